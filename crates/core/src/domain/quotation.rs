use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::rfq::RfqId;
use crate::domain::technical_recommendation::TechnicalRecommendationId;
use crate::domain::work_order::WorkOrderId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuotationId(pub String);

/// Final quotation stage. A quotation is only valid when the work order has
/// reached at least one sourcing stage, so either `rfq_id` or
/// `technical_recommendation_id` is populated at creation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quotation {
    pub id: QuotationId,
    pub work_order_id: WorkOrderId,
    pub code: String,
    pub rfq_id: Option<RfqId>,
    pub technical_recommendation_id: Option<TechnicalRecommendationId>,
    pub assigned_to: Option<String>,
    pub remarks: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewQuotation {
    pub work_order_id: WorkOrderId,
    pub assigned_to: Option<String>,
    pub remarks: Option<String>,
}
