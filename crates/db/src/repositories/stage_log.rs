use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};
use tracing::debug;

use ordertrack_core::domain::stage::{
    NewStageEvent, StageEvent, StageEventId, StageEventPatch, StageStatus,
};
use ordertrack_core::domain::work_order::WorkOrderId;
use ordertrack_core::routing::StageModule;

use super::{fmt_ts, parse_timestamp, RepositoryError, StageLogStore};
use crate::DbPool;

/// Append-only workflow log. Appending a stage event and propagating its
/// status onto the owning module's row happen inside one transaction: the
/// resolvers rely on the log and the denormalized `stage_status` columns
/// always agreeing.
pub struct SqlStageLogStore {
    pool: DbPool,
}

impl SqlStageLogStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const STAGE_EVENT_COLUMNS: &str = "id, work_order_id, stage_name, status, assigned_to, notified, remarks, created_at, updated_at";

pub(crate) fn event_from_row(row: SqliteRow) -> Result<StageEvent, RepositoryError> {
    let stage_name: String = row.try_get("stage_name")?;
    let stage = StageModule::from_stage_name(&stage_name)
        .map_err(|_| RepositoryError::Decode(format!("unknown stage name `{stage_name}`")))?;
    let status: String = row.try_get("status")?;

    Ok(StageEvent {
        id: StageEventId(row.try_get("id")?),
        work_order_id: WorkOrderId(row.try_get("work_order_id")?),
        stage,
        status: StageStatus::parse(&status),
        assigned_to: row.try_get("assigned_to")?,
        notified: row.try_get("notified")?,
        remarks: row.try_get("remarks")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

/// Insert one log row. Callers own the surrounding transaction.
pub(crate) async fn insert_event(
    conn: &mut SqliteConnection,
    event: &NewStageEvent,
    now: DateTime<Utc>,
) -> Result<StageEventId, RepositoryError> {
    let result = sqlx::query(
        "INSERT INTO stage_event (work_order_id, stage_name, status, assigned_to, notified, remarks, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&event.work_order_id.0)
    .bind(event.stage.stage_name())
    .bind(event.status.as_str())
    .bind(event.assigned_to.as_deref())
    .bind(event.notified)
    .bind(event.remarks.as_deref())
    .bind(fmt_ts(now))
    .bind(fmt_ts(now))
    .execute(&mut *conn)
    .await?;

    Ok(StageEventId(result.last_insert_rowid()))
}

/// Set the owning module's denormalized `stage_status`. Work Order, Sales
/// Lead, Technical Recommendation, and RFQ rows are scoped by the work
/// order; the account row is scoped by the work order's `account_id`. A
/// "Quotations" stage is log-only.
pub(crate) async fn propagate_status(
    conn: &mut SqliteConnection,
    stage: StageModule,
    work_order_id: &WorkOrderId,
    account_id: Option<&str>,
    status: &StageStatus,
    now: DateTime<Utc>,
) -> Result<(), RepositoryError> {
    match stage {
        StageModule::WorkOrder => {
            sqlx::query("UPDATE work_order SET stage_status = ?, updated_at = ? WHERE id = ?")
                .bind(status.as_str())
                .bind(fmt_ts(now))
                .bind(&work_order_id.0)
                .execute(&mut *conn)
                .await?;
        }
        StageModule::SalesLead | StageModule::TechnicalRecommendation | StageModule::Rfq => {
            let sql = format!(
                "UPDATE {} SET stage_status = ?, updated_at = ? WHERE work_order_id = ?",
                super::module_table(stage)
            );
            sqlx::query(&sql)
                .bind(status.as_str())
                .bind(fmt_ts(now))
                .bind(&work_order_id.0)
                .execute(&mut *conn)
                .await?;
        }
        StageModule::Account => {
            let Some(account_id) = account_id else {
                return Err(RepositoryError::Validation {
                    fields: vec!["accountId".to_string()],
                });
            };
            sqlx::query("UPDATE account SET stage_status = ?, updated_at = ? WHERE id = ?")
                .bind(status.as_str())
                .bind(fmt_ts(now))
                .bind(account_id)
                .execute(&mut *conn)
                .await?;
        }
        StageModule::Quotation => {}
    }
    Ok(())
}

pub(crate) async fn fetch_work_order_account(
    conn: &mut SqliteConnection,
    work_order_id: &WorkOrderId,
) -> Result<Option<String>, RepositoryError> {
    let row = sqlx::query("SELECT account_id FROM work_order WHERE id = ?")
        .bind(&work_order_id.0)
        .fetch_optional(&mut *conn)
        .await?;

    match row {
        Some(row) => Ok(row.try_get("account_id")?),
        None => Err(RepositoryError::NotFound {
            entity: "work order",
            id: work_order_id.0.clone(),
        }),
    }
}

#[async_trait::async_trait]
impl StageLogStore for SqlStageLogStore {
    async fn append(&self, event: NewStageEvent) -> Result<StageEvent, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let account_id = fetch_work_order_account(&mut tx, &event.work_order_id).await?;
        let now = Utc::now();
        let event_id = insert_event(&mut tx, &event, now).await?;
        propagate_status(
            &mut tx,
            event.stage,
            &event.work_order_id,
            account_id.as_deref(),
            &event.status,
            now,
        )
        .await?;

        let sql = format!("SELECT {STAGE_EVENT_COLUMNS} FROM stage_event WHERE id = ?");
        let row = sqlx::query(&sql).bind(event_id.0).fetch_one(&mut *tx).await?;
        let stored = event_from_row(row)?;

        tx.commit().await?;
        debug!(
            stage = stored.stage.stage_name(),
            status = %stored.status,
            work_order_id = %stored.work_order_id.0,
            "stage event appended"
        );
        Ok(stored)
    }

    async fn list_all(&self) -> Result<Vec<StageEvent>, RepositoryError> {
        let sql =
            format!("SELECT {STAGE_EVENT_COLUMNS} FROM stage_event ORDER BY created_at ASC, id ASC");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.into_iter().map(event_from_row).collect()
    }

    async fn list_by_work_order(
        &self,
        work_order_id: &WorkOrderId,
    ) -> Result<Vec<StageEvent>, RepositoryError> {
        let sql = format!(
            "SELECT {STAGE_EVENT_COLUMNS} FROM stage_event WHERE work_order_id = ? ORDER BY created_at ASC, id ASC"
        );
        let rows = sqlx::query(&sql).bind(&work_order_id.0).fetch_all(&self.pool).await?;
        rows.into_iter().map(event_from_row).collect()
    }

    async fn get(&self, id: StageEventId) -> Result<Option<StageEvent>, RepositoryError> {
        let sql = format!("SELECT {STAGE_EVENT_COLUMNS} FROM stage_event WHERE id = ?");
        let row = sqlx::query(&sql).bind(id.0).fetch_optional(&self.pool).await?;
        row.map(event_from_row).transpose()
    }

    async fn update(
        &self,
        id: StageEventId,
        patch: StageEventPatch,
    ) -> Result<Option<StageEvent>, RepositoryError> {
        let Some(existing) = self.get(id).await? else {
            return Ok(None);
        };

        let status = patch.status.unwrap_or(existing.status);
        let assigned_to = patch.assigned_to.unwrap_or(existing.assigned_to);
        let notified = patch.notified.unwrap_or(existing.notified);

        sqlx::query(
            "UPDATE stage_event SET status = ?, assigned_to = ?, notified = ?, updated_at = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(assigned_to.as_deref())
        .bind(notified)
        .bind(fmt_ts(Utc::now()))
        .bind(id.0)
        .execute(&self.pool)
        .await?;

        self.get(id).await
    }

    async fn delete(&self, id: StageEventId) -> Result<bool, RepositoryError> {
        let result =
            sqlx::query("DELETE FROM stage_event WHERE id = ?").bind(id.0).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn latest_stage(
        &self,
        work_order_id: &WorkOrderId,
    ) -> Result<Option<StageEvent>, RepositoryError> {
        let sql = format!(
            "SELECT {STAGE_EVENT_COLUMNS} FROM stage_event WHERE work_order_id = ? ORDER BY created_at DESC, id DESC LIMIT 1"
        );
        let row = sqlx::query(&sql).bind(&work_order_id.0).fetch_optional(&self.pool).await?;
        row.map(event_from_row).transpose()
    }
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use ordertrack_core::domain::stage::{NewStageEvent, StageEventPatch, StageStatus};
    use ordertrack_core::domain::work_order::WorkOrderId;
    use ordertrack_core::routing::StageModule;

    use super::SqlStageLogStore;
    use crate::repositories::{RepositoryError, StageLogStore};
    use crate::{connect_with_settings, migrations, DbPool};

    async fn setup() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    const TS: &str = "2025-03-01T08:00:00.000000Z";

    async fn insert_work_order(pool: &DbPool, id: &str, code: &str, account_id: Option<&str>) {
        sqlx::query(
            "INSERT INTO work_order (id, code, stage_status, account_id, created_by, created_at, updated_at)
             VALUES (?, ?, 'Pending', ?, 'tester', ?, ?)",
        )
        .bind(id)
        .bind(code)
        .bind(account_id)
        .bind(TS)
        .bind(TS)
        .execute(pool)
        .await
        .expect("insert work order");
    }

    async fn insert_account(pool: &DbPool, id: &str, code: &str) {
        sqlx::query(
            "INSERT INTO account (id, code, name, stage_status, created_at, updated_at)
             VALUES (?, ?, 'Globex', 'Draft', ?, ?)",
        )
        .bind(id)
        .bind(code)
        .bind(TS)
        .bind(TS)
        .execute(pool)
        .await
        .expect("insert account");
    }

    async fn insert_sales_lead(pool: &DbPool, id: &str, work_order_id: &str, code: &str) {
        sqlx::query(
            "INSERT INTO sales_lead (id, work_order_id, code, stage_status, created_at, updated_at)
             VALUES (?, ?, ?, 'Draft', ?, ?)",
        )
        .bind(id)
        .bind(work_order_id)
        .bind(code)
        .bind(TS)
        .bind(TS)
        .execute(pool)
        .await
        .expect("insert sales lead");
    }

    fn new_event(work_order_id: &str, stage: StageModule, status: StageStatus) -> NewStageEvent {
        NewStageEvent {
            work_order_id: WorkOrderId(work_order_id.to_string()),
            stage,
            status,
            assigned_to: Some("U-100".to_string()),
            notified: false,
            remarks: None,
        }
    }

    #[tokio::test]
    async fn append_writes_the_log_and_the_owning_module_row_together() {
        let pool = setup().await;
        insert_work_order(&pool, "wo-1", "WO-2025-0001", None).await;
        insert_sales_lead(&pool, "sl-1", "wo-1", "FSL-2025-0001").await;

        let store = SqlStageLogStore::new(pool.clone());
        let event = store
            .append(new_event("wo-1", StageModule::SalesLead, StageStatus::Submitted))
            .await
            .expect("append");

        assert_eq!(event.stage, StageModule::SalesLead);
        assert_eq!(event.status, StageStatus::Submitted);

        let status: String = sqlx::query("SELECT stage_status FROM sales_lead WHERE id = 'sl-1'")
            .fetch_one(&pool)
            .await
            .expect("sales lead row")
            .get("stage_status");
        assert_eq!(status, "Submitted");
    }

    #[tokio::test]
    async fn append_for_an_account_stage_updates_the_linked_account() {
        let pool = setup().await;
        insert_account(&pool, "acc-1", "NAEF-2025-0001").await;
        insert_work_order(&pool, "wo-1", "WO-2025-0001", Some("acc-1")).await;

        let store = SqlStageLogStore::new(pool.clone());
        store
            .append(new_event("wo-1", StageModule::Account, StageStatus::Submitted))
            .await
            .expect("append");

        let status: String = sqlx::query("SELECT stage_status FROM account WHERE id = 'acc-1'")
            .fetch_one(&pool)
            .await
            .expect("account row")
            .get("stage_status");
        assert_eq!(status, "Submitted");
    }

    #[tokio::test]
    async fn account_stage_without_a_linked_account_rolls_back_the_append() {
        let pool = setup().await;
        insert_work_order(&pool, "wo-1", "WO-2025-0001", None).await;

        let store = SqlStageLogStore::new(pool.clone());
        let error = store
            .append(new_event("wo-1", StageModule::Account, StageStatus::Draft))
            .await
            .expect_err("append must fail");
        assert!(matches!(error, RepositoryError::Validation { ref fields } if fields == &["accountId"]));

        let count: i64 = sqlx::query("SELECT COUNT(*) AS count FROM stage_event")
            .fetch_one(&pool)
            .await
            .expect("count")
            .get("count");
        assert_eq!(count, 0, "no log row may survive a failed propagation");
    }

    #[tokio::test]
    async fn append_for_a_missing_work_order_is_not_found() {
        let pool = setup().await;
        let store = SqlStageLogStore::new(pool);

        let error = store
            .append(new_event("wo-missing", StageModule::WorkOrder, StageStatus::Pending))
            .await
            .expect_err("append must fail");
        assert!(matches!(error, RepositoryError::NotFound { entity: "work order", .. }));
    }

    #[tokio::test]
    async fn update_patches_only_the_mutable_fields() {
        let pool = setup().await;
        insert_work_order(&pool, "wo-1", "WO-2025-0001", None).await;

        let store = SqlStageLogStore::new(pool);
        let event = store
            .append(new_event("wo-1", StageModule::WorkOrder, StageStatus::Pending))
            .await
            .expect("append");

        let updated = store
            .update(
                event.id,
                StageEventPatch {
                    status: Some(StageStatus::Submitted),
                    ..StageEventPatch::default()
                },
            )
            .await
            .expect("update")
            .expect("event exists");

        assert_eq!(updated.status, StageStatus::Submitted);
        assert_eq!(updated.assigned_to.as_deref(), Some("U-100"));
        assert_eq!(updated.stage, StageModule::WorkOrder);
        assert_eq!(updated.created_at, event.created_at);
    }

    #[tokio::test]
    async fn update_of_a_missing_event_returns_none() {
        let pool = setup().await;
        let store = SqlStageLogStore::new(pool);

        let result = store
            .update(
                ordertrack_core::domain::stage::StageEventId(4242),
                StageEventPatch::default(),
            )
            .await
            .expect("update");
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn latest_stage_is_the_newest_event_with_id_tie_break() {
        let pool = setup().await;
        insert_work_order(&pool, "wo-1", "WO-2025-0001", None).await;

        let store = SqlStageLogStore::new(pool.clone());
        store
            .append(new_event("wo-1", StageModule::WorkOrder, StageStatus::Pending))
            .await
            .expect("first append");
        let second = store
            .append(new_event("wo-1", StageModule::SalesLead, StageStatus::Draft))
            .await
            .expect("second append");

        // Force identical timestamps so only the id can break the tie.
        sqlx::query("UPDATE stage_event SET created_at = ?")
            .bind("2025-03-01T09:00:00.000000Z")
            .execute(&pool)
            .await
            .expect("flatten timestamps");

        let latest = store
            .latest_stage(&WorkOrderId("wo-1".to_string()))
            .await
            .expect("latest")
            .expect("exists");
        assert_eq!(latest.id, second.id);
        assert_eq!(latest.stage, StageModule::SalesLead);
    }

    #[tokio::test]
    async fn delete_removes_the_event() {
        let pool = setup().await;
        insert_work_order(&pool, "wo-1", "WO-2025-0001", None).await;

        let store = SqlStageLogStore::new(pool);
        let event = store
            .append(new_event("wo-1", StageModule::WorkOrder, StageStatus::Pending))
            .await
            .expect("append");

        assert!(store.delete(event.id).await.expect("delete"));
        assert!(store.get(event.id).await.expect("get").is_none());
        assert!(!store.delete(event.id).await.expect("second delete"));
    }

    #[tokio::test]
    async fn list_by_work_order_is_scoped_and_ordered() {
        let pool = setup().await;
        insert_work_order(&pool, "wo-1", "WO-2025-0001", None).await;
        insert_work_order(&pool, "wo-2", "WO-2025-0002", None).await;

        let store = SqlStageLogStore::new(pool);
        store
            .append(new_event("wo-1", StageModule::WorkOrder, StageStatus::Pending))
            .await
            .expect("append 1");
        store
            .append(new_event("wo-2", StageModule::WorkOrder, StageStatus::Pending))
            .await
            .expect("append 2");
        store
            .append(new_event("wo-1", StageModule::SalesLead, StageStatus::Draft))
            .await
            .expect("append 3");

        let events = store
            .list_by_work_order(&WorkOrderId("wo-1".to_string()))
            .await
            .expect("list");
        assert_eq!(events.len(), 2);
        assert!(events[0].id < events[1].id);
        assert_eq!(store.list_all().await.expect("list all").len(), 3);
    }
}
