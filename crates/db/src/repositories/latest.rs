//! Latest-stage resolution over the append-only log.
//!
//! "Current stage" is always computed: the log row with the greatest
//! `created_at` per work order, ties broken by the greatest id. The inbox
//! and assignee queries share that correlated-subquery predicate, then each
//! module contributes its own projection (module code, work-order code,
//! account name). SQLite has UNION, but the per-module column sets differ,
//! so the five result sets are merged client-side into one tagged list.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{sqlite::SqliteRow, Row};

use ordertrack_core::domain::stage::{StageEventId, StageStatus};
use ordertrack_core::domain::work_order::WorkOrderId;
use ordertrack_core::routing::StageModule;

use super::{module_table, parse_timestamp, RepositoryError};
use crate::DbPool;

/// Row of the cross-module "pending approval" inbox.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedEntry {
    pub module: StageModule,
    pub stage_event_id: StageEventId,
    pub work_order_id: WorkOrderId,
    pub work_order_code: String,
    /// The owning module's own transaction number (FSL/RFQ/TR/WO/NAEF code).
    pub reference_code: String,
    pub account_name: Option<String>,
    pub assigned_to: Option<String>,
    pub status: StageStatus,
    pub submitted_at: DateTime<Utc>,
}

/// A module's enriched row for "the latest item assigned to user X".
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignedWork {
    pub module: StageModule,
    pub record_id: String,
    pub code: String,
    pub work_order_id: WorkOrderId,
    pub work_order_code: String,
    pub account_name: Option<String>,
    pub status: StageStatus,
    pub assigned_to: String,
    pub queued_at: DateTime<Utc>,
}

#[async_trait]
pub trait WorkQueueResolver: Send + Sync {
    /// Cross-module inbox of work orders whose latest stage event is
    /// Submitted, each tagged with its owning module.
    async fn latest_submitted(&self) -> Result<Vec<SubmittedEntry>, RepositoryError>;

    /// The most recent work order whose latest stage event belongs to
    /// `module`, is assigned to `user_id`, and sits in the module's queue
    /// status (Pending for Work Order, Draft elsewhere).
    async fn latest_assigned(
        &self,
        user_id: &str,
        module: StageModule,
    ) -> Result<Option<AssignedWork>, RepositoryError>;

    /// Legacy entry point: resolve a free-text stage name through the
    /// substring routing table, then delegate to [`latest_assigned`].
    async fn route_latest_assigned(
        &self,
        user_id: &str,
        stage_text: &str,
    ) -> Result<Option<AssignedWork>, RepositoryError>;
}

pub struct SqlWorkQueueResolver {
    pool: DbPool,
}

impl SqlWorkQueueResolver {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

/// Inbox modules in merge order. Quotations close the process and have no
/// approval step of their own, so they do not contribute inbox rows.
const INBOX_MODULES: [StageModule; 5] = [
    StageModule::SalesLead,
    StageModule::Rfq,
    StageModule::TechnicalRecommendation,
    StageModule::WorkOrder,
    StageModule::Account,
];

/// "This row is the latest stage event of its work order."
const LATEST_ROW: &str = "s.id = (SELECT s2.id FROM stage_event s2 WHERE s2.work_order_id = s.work_order_id ORDER BY s2.created_at DESC, s2.id DESC LIMIT 1)";

fn module_joins(module: StageModule) -> (&'static str, String) {
    match module {
        StageModule::WorkOrder => (
            "wo.id AS record_id, wo.code AS reference_code, a.name AS account_name",
            "JOIN work_order wo ON wo.id = s.work_order_id
             LEFT JOIN account a ON a.id = wo.account_id"
                .to_string(),
        ),
        StageModule::Account => (
            "m.id AS record_id, m.code AS reference_code, m.name AS account_name",
            "JOIN work_order wo ON wo.id = s.work_order_id
             JOIN account m ON m.id = wo.account_id"
                .to_string(),
        ),
        other => (
            "m.id AS record_id, m.code AS reference_code, a.name AS account_name",
            format!(
                "JOIN work_order wo ON wo.id = s.work_order_id
                 JOIN {table} m ON m.work_order_id = s.work_order_id
                 LEFT JOIN account a ON a.id = wo.account_id",
                table = module_table(other)
            ),
        ),
    }
}

fn submitted_sql(module: StageModule) -> String {
    let (projection, joins) = module_joins(module);
    format!(
        "SELECT s.id AS stage_event_id, s.work_order_id, s.status, s.assigned_to, s.created_at,
                wo.code AS work_order_code, {projection}
           FROM stage_event s
           {joins}
          WHERE s.stage_name = ? AND s.status = 'Submitted' AND {LATEST_ROW}"
    )
}

fn assigned_sql(module: StageModule) -> String {
    let (projection, joins) = module_joins(module);
    format!(
        "SELECT s.id AS stage_event_id, s.work_order_id, s.status, s.assigned_to, s.created_at,
                wo.code AS work_order_code, {projection}
           FROM stage_event s
           {joins}
          WHERE s.stage_name = ? AND s.assigned_to = ? AND s.status = ? AND {LATEST_ROW}
          ORDER BY s.created_at DESC, s.id DESC
          LIMIT 1"
    )
}

fn submitted_from_row(module: StageModule, row: SqliteRow) -> Result<SubmittedEntry, RepositoryError> {
    let status: String = row.try_get("status")?;
    Ok(SubmittedEntry {
        module,
        stage_event_id: StageEventId(row.try_get("stage_event_id")?),
        work_order_id: WorkOrderId(row.try_get("work_order_id")?),
        work_order_code: row.try_get("work_order_code")?,
        reference_code: row.try_get("reference_code")?,
        account_name: row.try_get("account_name")?,
        assigned_to: row.try_get("assigned_to")?,
        status: StageStatus::parse(&status),
        submitted_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

fn assigned_from_row(module: StageModule, row: SqliteRow) -> Result<AssignedWork, RepositoryError> {
    let status: String = row.try_get("status")?;
    Ok(AssignedWork {
        module,
        record_id: row.try_get("record_id")?,
        code: row.try_get("reference_code")?,
        work_order_id: WorkOrderId(row.try_get("work_order_id")?),
        work_order_code: row.try_get("work_order_code")?,
        account_name: row.try_get("account_name")?,
        status: StageStatus::parse(&status),
        assigned_to: row.try_get("assigned_to")?,
        queued_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

#[async_trait]
impl WorkQueueResolver for SqlWorkQueueResolver {
    async fn latest_submitted(&self) -> Result<Vec<SubmittedEntry>, RepositoryError> {
        let mut entries = Vec::new();
        for module in INBOX_MODULES {
            let sql = submitted_sql(module);
            let rows = sqlx::query(&sql)
                .bind(module.stage_name())
                .fetch_all(&self.pool)
                .await?;
            for row in rows {
                entries.push(submitted_from_row(module, row)?);
            }
        }
        entries.sort_by(|a, b| {
            (b.submitted_at, b.stage_event_id).cmp(&(a.submitted_at, a.stage_event_id))
        });
        Ok(entries)
    }

    async fn latest_assigned(
        &self,
        user_id: &str,
        module: StageModule,
    ) -> Result<Option<AssignedWork>, RepositoryError> {
        let sql = assigned_sql(module);
        let row = sqlx::query(&sql)
            .bind(module.stage_name())
            .bind(user_id)
            .bind(module.assigned_status().as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| assigned_from_row(module, row)).transpose()
    }

    async fn route_latest_assigned(
        &self,
        user_id: &str,
        stage_text: &str,
    ) -> Result<Option<AssignedWork>, RepositoryError> {
        let module = StageModule::from_free_text(stage_text);
        self.latest_assigned(user_id, module).await
    }
}
