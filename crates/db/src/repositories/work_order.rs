use std::time::Duration;

use chrono::{Datelike, Utc};
use sqlx::{sqlite::SqliteRow, Row};
use uuid::Uuid;

use ordertrack_core::config::RetryConfig;
use ordertrack_core::domain::account::AccountId;
use ordertrack_core::domain::stage::{NewStageEvent, StageStatus};
use ordertrack_core::domain::work_order::{NewWorkOrder, WorkOrder, WorkOrderId};
use ordertrack_core::routing::StageModule;

use super::{fmt_ts, parse_timestamp, sequence, stage_log, RepositoryError, WorkOrderRepository};
use crate::retry::{with_conflict_retry, with_request_timeout};
use crate::DbPool;

const WORK_ORDER_COLUMNS: &str = "id, code, description, assigned_to, stage_status, account_id, created_by, created_at, updated_at";

pub struct SqlWorkOrderRepository {
    pool: DbPool,
    retry: RetryConfig,
    request_timeout: Duration,
}

impl SqlWorkOrderRepository {
    pub fn new(pool: DbPool) -> Self {
        Self::with_limits(pool, RetryConfig::default(), Duration::from_secs(30))
    }

    pub fn with_limits(pool: DbPool, retry: RetryConfig, request_timeout: Duration) -> Self {
        Self { pool, retry, request_timeout }
    }

    /// One intake attempt: sequence code, row insert, and the opening
    /// Pending stage event share a transaction.
    async fn create_once(&self, new: &NewWorkOrder) -> Result<WorkOrder, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();
        let code = sequence::next_code(&mut tx, StageModule::WorkOrder, now.year()).await?;
        let id = Uuid::new_v4().to_string();
        let status = StageModule::WorkOrder.assigned_status();

        sqlx::query(
            "INSERT INTO work_order (id, code, description, assigned_to, stage_status, account_id, created_by, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&code)
        .bind(new.description.as_deref())
        .bind(new.assigned_to.as_deref())
        .bind(status.as_str())
        .bind(new.account_id.as_ref().map(|account| account.0.as_str()))
        .bind(&new.created_by)
        .bind(fmt_ts(now))
        .bind(fmt_ts(now))
        .execute(&mut *tx)
        .await
        .map_err(|error| RepositoryError::classify(error, "work order code"))?;

        stage_log::insert_event(
            &mut tx,
            &NewStageEvent {
                work_order_id: WorkOrderId(id.clone()),
                stage: StageModule::WorkOrder,
                status,
                assigned_to: new.assigned_to.clone(),
                notified: false,
                remarks: None,
            },
            now,
        )
        .await?;

        let sql = format!("SELECT {WORK_ORDER_COLUMNS} FROM work_order WHERE id = ?");
        let row = sqlx::query(&sql).bind(&id).fetch_one(&mut *tx).await?;
        let stored = work_order_from_row(row)?;
        tx.commit().await?;
        Ok(stored)
    }
}

pub(crate) fn work_order_from_row(row: SqliteRow) -> Result<WorkOrder, RepositoryError> {
    let status: String = row.try_get("stage_status")?;
    let account_id: Option<String> = row.try_get("account_id")?;

    Ok(WorkOrder {
        id: WorkOrderId(row.try_get("id")?),
        code: row.try_get("code")?,
        description: row.try_get("description")?,
        assigned_to: row.try_get("assigned_to")?,
        stage_status: StageStatus::parse(&status),
        account_id: account_id.map(AccountId),
        created_by: row.try_get("created_by")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

#[async_trait::async_trait]
impl WorkOrderRepository for SqlWorkOrderRepository {
    async fn create(&self, new: NewWorkOrder) -> Result<WorkOrder, RepositoryError> {
        with_request_timeout(
            self.request_timeout,
            with_conflict_retry(&self.retry, |_| self.create_once(&new)),
        )
        .await
    }

    async fn get(&self, id: &WorkOrderId) -> Result<Option<WorkOrder>, RepositoryError> {
        let sql = format!("SELECT {WORK_ORDER_COLUMNS} FROM work_order WHERE id = ?");
        let row = sqlx::query(&sql).bind(&id.0).fetch_optional(&self.pool).await?;
        row.map(work_order_from_row).transpose()
    }

    async fn list(&self) -> Result<Vec<WorkOrder>, RepositoryError> {
        let sql = format!("SELECT {WORK_ORDER_COLUMNS} FROM work_order ORDER BY created_at ASC, code ASC");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.into_iter().map(work_order_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, Utc};
    use sqlx::Row;

    use ordertrack_core::domain::stage::StageStatus;
    use ordertrack_core::domain::work_order::NewWorkOrder;

    use super::SqlWorkOrderRepository;
    use crate::repositories::WorkOrderRepository;
    use crate::{connect_with_settings, migrations, DbPool};

    async fn setup() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn intake(description: &str) -> NewWorkOrder {
        NewWorkOrder {
            description: Some(description.to_string()),
            assigned_to: Some("U-1".to_string()),
            account_id: None,
            created_by: "intake".to_string(),
        }
    }

    #[tokio::test]
    async fn create_assigns_sequential_codes_and_opens_the_pending_stage() {
        let pool = setup().await;
        let repo = SqlWorkOrderRepository::new(pool.clone());
        let year = Utc::now().year();

        let first = repo.create(intake("compressor overhaul")).await.expect("first create");
        let second = repo.create(intake("pump replacement")).await.expect("second create");

        assert_eq!(first.code, format!("WO-{year}-0001"));
        assert_eq!(second.code, format!("WO-{year}-0002"));
        assert_eq!(first.stage_status, StageStatus::Pending);

        let row = sqlx::query(
            "SELECT stage_name, status, assigned_to FROM stage_event WHERE work_order_id = ?",
        )
        .bind(&first.id.0)
        .fetch_one(&pool)
        .await
        .expect("opening stage event");
        assert_eq!(row.get::<String, _>("stage_name"), "Work Order");
        assert_eq!(row.get::<String, _>("status"), "Pending");
        assert_eq!(row.get::<Option<String>, _>("assigned_to").as_deref(), Some("U-1"));
    }

    #[tokio::test]
    async fn get_round_trips_the_stored_row() {
        let pool = setup().await;
        let repo = SqlWorkOrderRepository::new(pool);

        let created = repo.create(intake("valve inspection")).await.expect("create");
        let found = repo.get(&created.id).await.expect("get").expect("exists");

        assert_eq!(found, created);
        assert_eq!(repo.list().await.expect("list").len(), 1);
    }
}
