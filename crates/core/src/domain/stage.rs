use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::work_order::WorkOrderId;
use crate::routing::StageModule;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StageEventId(pub i64);

/// Approval-style status of a stage event. The stored domain is an open set
/// of strings; the well-known statuses get variants and anything else is
/// carried through verbatim rather than rejected.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StageStatus {
    Draft,
    Pending,
    InProgress,
    Submitted,
    Approved,
    Rejected,
    Other(String),
}

impl StageStatus {
    pub fn parse(value: &str) -> Self {
        match value {
            "Draft" => Self::Draft,
            "Pending" => Self::Pending,
            "In Progress" => Self::InProgress,
            "Submitted" => Self::Submitted,
            "Approved" => Self::Approved,
            "Rejected" => Self::Rejected,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Draft => "Draft",
            Self::Pending => "Pending",
            Self::InProgress => "In Progress",
            Self::Submitted => "Submitted",
            Self::Approved => "Approved",
            Self::Rejected => "Rejected",
            Self::Other(value) => value,
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for StageStatus {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<StageStatus> for String {
    fn from(value: StageStatus) -> Self {
        value.as_str().to_string()
    }
}

/// One immutable row of the append-only workflow log. The current stage of a
/// work order is the row with the greatest `created_at`, ties broken by the
/// greatest id; it is computed, never stored as a pointer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageEvent {
    pub id: StageEventId,
    pub work_order_id: WorkOrderId,
    pub stage: StageModule,
    pub status: StageStatus,
    pub assigned_to: Option<String>,
    pub notified: bool,
    pub remarks: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewStageEvent {
    pub work_order_id: WorkOrderId,
    pub stage: StageModule,
    pub status: StageStatus,
    pub assigned_to: Option<String>,
    pub notified: bool,
    pub remarks: Option<String>,
}

/// Partial update of a stage event. Only status, assignee, and the notified
/// flag are mutable; everything else in the log is immutable.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StageEventPatch {
    pub status: Option<StageStatus>,
    pub assigned_to: Option<Option<String>>,
    pub notified: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::StageStatus;

    #[test]
    fn known_statuses_round_trip() {
        for raw in ["Draft", "Pending", "In Progress", "Submitted", "Approved", "Rejected"] {
            let status = StageStatus::parse(raw);
            assert!(!matches!(status, StageStatus::Other(_)), "{raw} should be a known status");
            assert_eq!(status.as_str(), raw);
        }
    }

    #[test]
    fn unknown_status_is_carried_through() {
        let status = StageStatus::parse("On Hold");
        assert_eq!(status, StageStatus::Other("On Hold".to_string()));
        assert_eq!(status.as_str(), "On Hold");
    }

    #[test]
    fn serde_uses_the_string_domain() {
        let json = serde_json::to_string(&StageStatus::InProgress).expect("serialize");
        assert_eq!(json, "\"In Progress\"");
        let back: StageStatus = serde_json::from_str("\"On Hold\"").expect("deserialize");
        assert_eq!(back, StageStatus::Other("On Hold".to_string()));
    }
}
