use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::stage::StageStatus;
use crate::domain::work_order::WorkOrderId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TechnicalRecommendationId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TechnicalRecommendation {
    pub id: TechnicalRecommendationId,
    pub work_order_id: WorkOrderId,
    pub code: String,
    pub details: Option<String>,
    pub assigned_to: Option<String>,
    pub stage_status: StageStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTechnicalRecommendation {
    pub work_order_id: WorkOrderId,
    pub details: Option<String>,
    pub assigned_to: Option<String>,
}
