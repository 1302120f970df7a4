use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::stage::StageStatus;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId(pub String);

/// Account-enrollment (NAEF) record. NAEF stage events propagate their
/// status here, scoped through the owning work order's `account_id`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub code: String,
    pub name: String,
    pub stage_status: StageStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAccount {
    pub name: String,
    pub assigned_to: Option<String>,
}
