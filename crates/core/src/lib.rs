pub mod config;
pub mod domain;
pub mod errors;
pub mod reconcile;
pub mod routing;
pub mod sequence;

pub use chrono;
pub use rust_decimal;

pub use domain::account::{Account, AccountId, NewAccount};
pub use domain::quotation::{NewQuotation, Quotation, QuotationId};
pub use domain::rfq::{
    NewRfq, Rfq, RfqDesiredState, RfqDetail, RfqId, RfqItem, RfqItemVendorQuote, RfqVendor,
};
pub use domain::sales_lead::{NewSalesLead, SalesLead, SalesLeadId};
pub use domain::stage::{NewStageEvent, StageEvent, StageEventId, StageEventPatch, StageStatus};
pub use domain::technical_recommendation::{
    NewTechnicalRecommendation, TechnicalRecommendation, TechnicalRecommendationId,
};
pub use domain::work_order::{NewWorkOrder, WorkOrder, WorkOrderId};
pub use errors::DomainError;
pub use routing::StageModule;
