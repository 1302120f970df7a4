use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::account::AccountId;
use crate::domain::stage::StageStatus;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkOrderId(pub String);

/// Root entity the multi-stage process hangs off. `stage_status` is the
/// denormalized copy of the latest stage event's status, kept in sync by the
/// stage-append transaction; work orders are never hard-deleted in the
/// normal flow.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkOrder {
    pub id: WorkOrderId,
    pub code: String,
    pub description: Option<String>,
    pub assigned_to: Option<String>,
    pub stage_status: StageStatus,
    pub account_id: Option<AccountId>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewWorkOrder {
    pub description: Option<String>,
    pub assigned_to: Option<String>,
    pub account_id: Option<AccountId>,
    pub created_by: String,
}
