use std::time::Duration;

use chrono::{Datelike, Utc};
use sqlx::{sqlite::SqliteRow, Row};
use uuid::Uuid;

use ordertrack_core::config::RetryConfig;
use ordertrack_core::domain::sales_lead::{NewSalesLead, SalesLead, SalesLeadId};
use ordertrack_core::domain::stage::{NewStageEvent, StageStatus};
use ordertrack_core::domain::work_order::WorkOrderId;
use ordertrack_core::routing::StageModule;

use super::{fmt_ts, parse_timestamp, sequence, stage_log, RepositoryError, SalesLeadRepository};
use crate::retry::{with_conflict_retry, with_request_timeout};
use crate::DbPool;

const SALES_LEAD_COLUMNS: &str =
    "id, work_order_id, code, brand, assigned_to, stage_status, created_at, updated_at";

pub struct SqlSalesLeadRepository {
    pool: DbPool,
    retry: RetryConfig,
    request_timeout: Duration,
}

impl SqlSalesLeadRepository {
    pub fn new(pool: DbPool) -> Self {
        Self::with_limits(pool, RetryConfig::default(), Duration::from_secs(30))
    }

    pub fn with_limits(pool: DbPool, retry: RetryConfig, request_timeout: Duration) -> Self {
        Self { pool, retry, request_timeout }
    }

    async fn create_once(&self, new: &NewSalesLead) -> Result<SalesLead, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        stage_log::fetch_work_order_account(&mut tx, &new.work_order_id).await?;

        let now = Utc::now();
        let code = sequence::next_code(&mut tx, StageModule::SalesLead, now.year()).await?;
        let id = Uuid::new_v4().to_string();
        let status = StageModule::SalesLead.assigned_status();

        sqlx::query(
            "INSERT INTO sales_lead (id, work_order_id, code, brand, assigned_to, stage_status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&new.work_order_id.0)
        .bind(&code)
        .bind(new.brand.as_deref())
        .bind(new.assigned_to.as_deref())
        .bind(status.as_str())
        .bind(fmt_ts(now))
        .bind(fmt_ts(now))
        .execute(&mut *tx)
        .await
        .map_err(|error| RepositoryError::classify(error, "sales lead code"))?;

        stage_log::insert_event(
            &mut tx,
            &NewStageEvent {
                work_order_id: new.work_order_id.clone(),
                stage: StageModule::SalesLead,
                status,
                assigned_to: new.assigned_to.clone(),
                notified: false,
                remarks: None,
            },
            now,
        )
        .await?;

        let sql = format!("SELECT {SALES_LEAD_COLUMNS} FROM sales_lead WHERE id = ?");
        let row = sqlx::query(&sql).bind(&id).fetch_one(&mut *tx).await?;
        let stored = sales_lead_from_row(row)?;
        tx.commit().await?;
        Ok(stored)
    }
}

fn sales_lead_from_row(row: SqliteRow) -> Result<SalesLead, RepositoryError> {
    let status: String = row.try_get("stage_status")?;
    Ok(SalesLead {
        id: SalesLeadId(row.try_get("id")?),
        work_order_id: WorkOrderId(row.try_get("work_order_id")?),
        code: row.try_get("code")?,
        brand: row.try_get("brand")?,
        assigned_to: row.try_get("assigned_to")?,
        stage_status: StageStatus::parse(&status),
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

#[async_trait::async_trait]
impl SalesLeadRepository for SqlSalesLeadRepository {
    async fn create(&self, new: NewSalesLead) -> Result<SalesLead, RepositoryError> {
        with_request_timeout(
            self.request_timeout,
            with_conflict_retry(&self.retry, |_| self.create_once(&new)),
        )
        .await
    }

    async fn get(&self, id: &SalesLeadId) -> Result<Option<SalesLead>, RepositoryError> {
        let sql = format!("SELECT {SALES_LEAD_COLUMNS} FROM sales_lead WHERE id = ?");
        let row = sqlx::query(&sql).bind(&id.0).fetch_optional(&self.pool).await?;
        row.map(sales_lead_from_row).transpose()
    }

    async fn find_by_work_order(
        &self,
        work_order_id: &WorkOrderId,
    ) -> Result<Vec<SalesLead>, RepositoryError> {
        let sql = format!(
            "SELECT {SALES_LEAD_COLUMNS} FROM sales_lead WHERE work_order_id = ? ORDER BY created_at ASC, code ASC"
        );
        let rows = sqlx::query(&sql).bind(&work_order_id.0).fetch_all(&self.pool).await?;
        rows.into_iter().map(sales_lead_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, Utc};
    use sqlx::Row;

    use ordertrack_core::domain::sales_lead::NewSalesLead;
    use ordertrack_core::domain::stage::StageStatus;
    use ordertrack_core::domain::work_order::WorkOrderId;

    use super::SqlSalesLeadRepository;
    use crate::repositories::{RepositoryError, SalesLeadRepository};
    use crate::{connect_with_settings, migrations, DbPool};

    async fn setup_with_work_order(id: &str) -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        sqlx::query(
            "INSERT INTO work_order (id, code, stage_status, created_by, created_at, updated_at)
             VALUES (?, ?, 'Pending', 'tester', '2025-03-01T08:00:00.000000Z', '2025-03-01T08:00:00.000000Z')",
        )
        .bind(id)
        .bind(format!("WO-2025-{}", &id[3..]))
        .execute(&pool)
        .await
        .expect("insert work order");
        pool
    }

    #[tokio::test]
    async fn create_codes_the_lead_and_opens_its_draft_stage() {
        let pool = setup_with_work_order("wo-0001").await;
        let repo = SqlSalesLeadRepository::new(pool.clone());
        let year = Utc::now().year();

        let lead = repo
            .create(NewSalesLead {
                work_order_id: WorkOrderId("wo-0001".to_string()),
                brand: Some("Atlas".to_string()),
                assigned_to: Some("U-2".to_string()),
            })
            .await
            .expect("create");

        assert_eq!(lead.code, format!("FSL-{year}-0001"));
        assert_eq!(lead.stage_status, StageStatus::Draft);

        let row = sqlx::query("SELECT stage_name, status FROM stage_event WHERE work_order_id = 'wo-0001'")
            .fetch_one(&pool)
            .await
            .expect("stage event");
        assert_eq!(row.get::<String, _>("stage_name"), "Sales Lead");
        assert_eq!(row.get::<String, _>("status"), "Draft");
    }

    #[tokio::test]
    async fn create_for_a_missing_work_order_is_not_found() {
        let pool = setup_with_work_order("wo-0001").await;
        let repo = SqlSalesLeadRepository::new(pool);

        let error = repo
            .create(NewSalesLead {
                work_order_id: WorkOrderId("wo-missing".to_string()),
                brand: None,
                assigned_to: None,
            })
            .await
            .expect_err("must fail");
        assert!(matches!(error, RepositoryError::NotFound { entity: "work order", .. }));
    }

    #[tokio::test]
    async fn find_by_work_order_scopes_results() {
        let pool = setup_with_work_order("wo-0001").await;
        let repo = SqlSalesLeadRepository::new(pool);

        let lead = repo
            .create(NewSalesLead {
                work_order_id: WorkOrderId("wo-0001".to_string()),
                brand: None,
                assigned_to: None,
            })
            .await
            .expect("create");

        let found = repo
            .find_by_work_order(&WorkOrderId("wo-0001".to_string()))
            .await
            .expect("find");
        assert_eq!(found, vec![lead.clone()]);
        assert_eq!(repo.get(&lead.id).await.expect("get"), Some(lead));
    }
}
