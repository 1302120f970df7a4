//! Module routing: the closed set of workflow stages plus the legacy
//! free-text dispatch shim.
//!
//! Typed callers go through [`StageModule`] directly. Free-text stage names
//! still arrive from older clients ("SL", "Technical Reco Draft", "Quote");
//! those are routed by case-insensitive substring containment against a
//! priority-ordered table where the first match wins and anything unmatched
//! falls back to the Work Order module. The table ordering is part of the
//! contract — reordering it silently reroutes inputs like "SL".

use serde::{Deserialize, Serialize};

use crate::domain::stage::StageStatus;
use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageModule {
    WorkOrder,
    SalesLead,
    TechnicalRecommendation,
    Rfq,
    Account,
    Quotation,
}

/// Priority-ordered (substring, module) routing pairs. First match wins.
const FREE_TEXT_ROUTES: &[(&str, StageModule)] = &[
    ("sales lead", StageModule::SalesLead),
    ("sl", StageModule::SalesLead),
    ("workorder", StageModule::WorkOrder),
    ("wo", StageModule::WorkOrder),
    ("technical reco", StageModule::TechnicalRecommendation),
    ("tr", StageModule::TechnicalRecommendation),
    ("rfq", StageModule::Rfq),
    ("quotation", StageModule::Quotation),
    ("quote", StageModule::Quotation),
];

impl StageModule {
    pub const ALL: [StageModule; 6] = [
        StageModule::WorkOrder,
        StageModule::SalesLead,
        StageModule::TechnicalRecommendation,
        StageModule::Rfq,
        StageModule::Account,
        StageModule::Quotation,
    ];

    /// Canonical `stage_name` value persisted in the stage log.
    pub fn stage_name(&self) -> &'static str {
        match self {
            Self::WorkOrder => "Work Order",
            Self::SalesLead => "Sales Lead",
            Self::TechnicalRecommendation => "Technical Recommendation",
            Self::Rfq => "RFQ",
            Self::Account => "NAEF",
            Self::Quotation => "Quotations",
        }
    }

    /// Snake-case discriminator used to tag merged inbox rows.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::WorkOrder => "work_order",
            Self::SalesLead => "sales_lead",
            Self::TechnicalRecommendation => "technical_recommendation",
            Self::Rfq => "rfq",
            Self::Account => "account",
            Self::Quotation => "quotation",
        }
    }

    pub fn code_prefix(&self) -> &'static str {
        match self {
            Self::WorkOrder => "WO",
            Self::SalesLead => "FSL",
            Self::TechnicalRecommendation => "TR",
            Self::Rfq => "RFQ",
            Self::Account => "NAEF",
            Self::Quotation => "QTN",
        }
    }

    /// Status carried by a module's freshly assigned work: work orders queue
    /// as Pending, every other module queues as Draft.
    pub fn assigned_status(&self) -> StageStatus {
        match self {
            Self::WorkOrder => StageStatus::Pending,
            _ => StageStatus::Draft,
        }
    }

    /// Typed parse of a canonical stage name. "Account" is accepted as an
    /// alias for the NAEF stage.
    pub fn from_stage_name(name: &str) -> Result<Self, DomainError> {
        let trimmed = name.trim();
        Self::ALL
            .into_iter()
            .find(|module| {
                trimmed.eq_ignore_ascii_case(module.stage_name())
                    || (*module == Self::Account && trimmed.eq_ignore_ascii_case("Account"))
            })
            .ok_or_else(|| DomainError::UnknownStage(name.to_string()))
    }

    /// Legacy free-text routing shim (see module docs).
    pub fn from_free_text(input: &str) -> Self {
        let needle = input.to_ascii_lowercase();
        FREE_TEXT_ROUTES
            .iter()
            .find(|(fragment, _)| needle.contains(fragment))
            .map(|(_, module)| *module)
            .unwrap_or(StageModule::WorkOrder)
    }
}
