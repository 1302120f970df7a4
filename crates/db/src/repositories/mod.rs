use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use ordertrack_core::domain::account::{Account, AccountId, NewAccount};
use ordertrack_core::domain::quotation::{NewQuotation, Quotation, QuotationId};
use ordertrack_core::domain::rfq::{NewRfq, Rfq, RfqDesiredState, RfqDetail, RfqId};
use ordertrack_core::domain::sales_lead::{NewSalesLead, SalesLead, SalesLeadId};
use ordertrack_core::domain::stage::{NewStageEvent, StageEvent, StageEventId, StageEventPatch};
use ordertrack_core::domain::technical_recommendation::{
    NewTechnicalRecommendation, TechnicalRecommendation, TechnicalRecommendationId,
};
use ordertrack_core::domain::work_order::{NewWorkOrder, WorkOrder, WorkOrderId};
use ordertrack_core::errors::DomainError;
use ordertrack_core::routing::StageModule;

pub mod account;
pub mod latest;
pub mod quotation;
pub mod rfq;
pub mod sales_lead;
pub mod sequence;
pub mod stage_log;
pub mod technical_recommendation;
pub mod work_order;

pub use account::SqlAccountRepository;
pub use latest::{AssignedWork, SqlWorkQueueResolver, SubmittedEntry, WorkQueueResolver};
pub use quotation::SqlQuotationRepository;
pub use rfq::SqlRfqRepository;
pub use sales_lead::SqlSalesLeadRepository;
pub use stage_log::SqlStageLogStore;
pub use technical_recommendation::SqlTechnicalRecommendationRepository;
pub use work_order::SqlWorkOrderRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("validation failed for fields: {fields:?}")]
    Validation { fields: Vec<String> },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl RepositoryError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Classify a sqlx failure: unique-constraint violations become
    /// retryable conflicts, everything else stays a database error.
    pub(crate) fn classify(error: sqlx::Error, context: &str) -> Self {
        if let sqlx::Error::Database(db_error) = &error {
            if db_error.is_unique_violation() {
                return Self::Conflict(format!("{context}: {}", db_error.message()));
            }
        }
        Self::Database(error)
    }
}

impl From<DomainError> for RepositoryError {
    fn from(error: DomainError) -> Self {
        match error {
            DomainError::MissingFields { fields } => Self::Validation { fields },
            DomainError::UnknownStage(_) => {
                Self::Validation { fields: vec!["stageName".to_string()] }
            }
            DomainError::MalformedCode(message) => Self::Decode(message),
            DomainError::InvariantViolation(message) => Self::Decode(message),
        }
    }
}

#[async_trait]
pub trait StageLogStore: Send + Sync {
    async fn append(&self, event: NewStageEvent) -> Result<StageEvent, RepositoryError>;
    async fn list_all(&self) -> Result<Vec<StageEvent>, RepositoryError>;
    async fn list_by_work_order(
        &self,
        work_order_id: &WorkOrderId,
    ) -> Result<Vec<StageEvent>, RepositoryError>;
    async fn get(&self, id: StageEventId) -> Result<Option<StageEvent>, RepositoryError>;
    async fn update(
        &self,
        id: StageEventId,
        patch: StageEventPatch,
    ) -> Result<Option<StageEvent>, RepositoryError>;
    async fn delete(&self, id: StageEventId) -> Result<bool, RepositoryError>;
    async fn latest_stage(
        &self,
        work_order_id: &WorkOrderId,
    ) -> Result<Option<StageEvent>, RepositoryError>;
}

#[async_trait]
pub trait WorkOrderRepository: Send + Sync {
    async fn create(&self, new: NewWorkOrder) -> Result<WorkOrder, RepositoryError>;
    async fn get(&self, id: &WorkOrderId) -> Result<Option<WorkOrder>, RepositoryError>;
    async fn list(&self) -> Result<Vec<WorkOrder>, RepositoryError>;
}

#[async_trait]
pub trait SalesLeadRepository: Send + Sync {
    async fn create(&self, new: NewSalesLead) -> Result<SalesLead, RepositoryError>;
    async fn get(&self, id: &SalesLeadId) -> Result<Option<SalesLead>, RepositoryError>;
    async fn find_by_work_order(
        &self,
        work_order_id: &WorkOrderId,
    ) -> Result<Vec<SalesLead>, RepositoryError>;
}

#[async_trait]
pub trait TechnicalRecommendationRepository: Send + Sync {
    async fn create(
        &self,
        new: NewTechnicalRecommendation,
    ) -> Result<TechnicalRecommendation, RepositoryError>;
    async fn get(
        &self,
        id: &TechnicalRecommendationId,
    ) -> Result<Option<TechnicalRecommendation>, RepositoryError>;
    async fn find_by_work_order(
        &self,
        work_order_id: &WorkOrderId,
    ) -> Result<Vec<TechnicalRecommendation>, RepositoryError>;
}

#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Enroll an account for a work order: create the NAEF record, link it
    /// onto the work order, and open its Draft stage, atomically.
    async fn enroll(
        &self,
        work_order_id: &WorkOrderId,
        new: NewAccount,
    ) -> Result<Account, RepositoryError>;
    async fn get(&self, id: &AccountId) -> Result<Option<Account>, RepositoryError>;
}

#[async_trait]
pub trait QuotationRepository: Send + Sync {
    async fn create(&self, new: NewQuotation) -> Result<Quotation, RepositoryError>;
    async fn get(&self, id: &QuotationId) -> Result<Option<Quotation>, RepositoryError>;
}

#[async_trait]
pub trait RfqRepository: Send + Sync {
    async fn create(&self, new: NewRfq) -> Result<Rfq, RepositoryError>;
    async fn get_detail(&self, id: &RfqId) -> Result<Option<RfqDetail>, RepositoryError>;
    /// Reconcile the RFQ's items, vendors, and quotes against the submitted
    /// desired state and return the fully resolved RFQ.
    async fn apply_desired_state(
        &self,
        id: &RfqId,
        desired: RfqDesiredState,
    ) -> Result<RfqDetail, RepositoryError>;
}

pub(crate) fn module_table(module: StageModule) -> &'static str {
    match module {
        StageModule::WorkOrder => "work_order",
        StageModule::SalesLead => "sales_lead",
        StageModule::TechnicalRecommendation => "technical_recommendation",
        StageModule::Rfq => "rfq",
        StageModule::Account => "account",
        StageModule::Quotation => "quotation",
    }
}

// Timestamps persist as RFC 3339 text at fixed microsecond width so that
// lexicographic ordering in SQL agrees with instant ordering.
pub(crate) fn fmt_ts(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn parse_decimal(column: &str, value: String) -> Result<Decimal, RepositoryError> {
    value.parse::<Decimal>().map_err(|error| {
        RepositoryError::Decode(format!("invalid decimal in `{column}`: `{value}` ({error})"))
    })
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}
