use std::time::Duration;

use chrono::{Datelike, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};
use uuid::Uuid;

use ordertrack_core::config::RetryConfig;
use ordertrack_core::domain::quotation::{NewQuotation, Quotation, QuotationId};
use ordertrack_core::domain::rfq::RfqId;
use ordertrack_core::domain::stage::NewStageEvent;
use ordertrack_core::domain::technical_recommendation::TechnicalRecommendationId;
use ordertrack_core::domain::work_order::WorkOrderId;
use ordertrack_core::routing::StageModule;

use super::{fmt_ts, parse_timestamp, sequence, stage_log, QuotationRepository, RepositoryError};
use crate::retry::{with_conflict_retry, with_request_timeout};
use crate::DbPool;

const QUOTATION_COLUMNS: &str = "id, work_order_id, code, rfq_id, technical_recommendation_id, assigned_to, remarks, created_at, updated_at";

pub struct SqlQuotationRepository {
    pool: DbPool,
    retry: RetryConfig,
    request_timeout: Duration,
}

impl SqlQuotationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self::with_limits(pool, RetryConfig::default(), Duration::from_secs(30))
    }

    pub fn with_limits(pool: DbPool, retry: RetryConfig, request_timeout: Duration) -> Self {
        Self { pool, retry, request_timeout }
    }

    async fn create_once(&self, new: &NewQuotation) -> Result<Quotation, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        stage_log::fetch_work_order_account(&mut tx, &new.work_order_id).await?;

        // A quotation needs a sourcing stage to price from: the newest RFQ
        // if one exists, otherwise the newest technical recommendation.
        let rfq_id = latest_child_id(&mut tx, "rfq", &new.work_order_id).await?;
        let tr_id = match rfq_id {
            Some(_) => None,
            None => latest_child_id(&mut tx, "technical_recommendation", &new.work_order_id).await?,
        };
        if rfq_id.is_none() && tr_id.is_none() {
            return Err(RepositoryError::Validation {
                fields: vec!["rfqId".to_string(), "technicalRecommendationId".to_string()],
            });
        }

        let now = Utc::now();
        let code = sequence::next_code(&mut tx, StageModule::Quotation, now.year()).await?;
        let id = Uuid::new_v4().to_string();

        sqlx::query(
            "INSERT INTO quotation (id, work_order_id, code, rfq_id, technical_recommendation_id, assigned_to, remarks, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&new.work_order_id.0)
        .bind(&code)
        .bind(rfq_id.as_deref())
        .bind(tr_id.as_deref())
        .bind(new.assigned_to.as_deref())
        .bind(new.remarks.as_deref())
        .bind(fmt_ts(now))
        .bind(fmt_ts(now))
        .execute(&mut *tx)
        .await
        .map_err(|error| RepositoryError::classify(error, "quotation code"))?;

        stage_log::insert_event(
            &mut tx,
            &NewStageEvent {
                work_order_id: new.work_order_id.clone(),
                stage: StageModule::Quotation,
                status: StageModule::Quotation.assigned_status(),
                assigned_to: new.assigned_to.clone(),
                notified: false,
                remarks: new.remarks.clone(),
            },
            now,
        )
        .await?;

        let sql = format!("SELECT {QUOTATION_COLUMNS} FROM quotation WHERE id = ?");
        let row = sqlx::query(&sql).bind(&id).fetch_one(&mut *tx).await?;
        let stored = quotation_from_row(row)?;
        tx.commit().await?;
        Ok(stored)
    }
}

async fn latest_child_id(
    conn: &mut SqliteConnection,
    table: &str,
    work_order_id: &WorkOrderId,
) -> Result<Option<String>, RepositoryError> {
    let sql = format!(
        "SELECT id FROM {table} WHERE work_order_id = ? ORDER BY created_at DESC, code DESC LIMIT 1"
    );
    let id: Option<String> =
        sqlx::query_scalar(&sql).bind(&work_order_id.0).fetch_optional(&mut *conn).await?;
    Ok(id)
}

fn quotation_from_row(row: SqliteRow) -> Result<Quotation, RepositoryError> {
    let rfq_id: Option<String> = row.try_get("rfq_id")?;
    let tr_id: Option<String> = row.try_get("technical_recommendation_id")?;

    Ok(Quotation {
        id: QuotationId(row.try_get("id")?),
        work_order_id: WorkOrderId(row.try_get("work_order_id")?),
        code: row.try_get("code")?,
        rfq_id: rfq_id.map(RfqId),
        technical_recommendation_id: tr_id.map(TechnicalRecommendationId),
        assigned_to: row.try_get("assigned_to")?,
        remarks: row.try_get("remarks")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

#[async_trait::async_trait]
impl QuotationRepository for SqlQuotationRepository {
    async fn create(&self, new: NewQuotation) -> Result<Quotation, RepositoryError> {
        with_request_timeout(
            self.request_timeout,
            with_conflict_retry(&self.retry, |_| self.create_once(&new)),
        )
        .await
    }

    async fn get(&self, id: &QuotationId) -> Result<Option<Quotation>, RepositoryError> {
        let sql = format!("SELECT {QUOTATION_COLUMNS} FROM quotation WHERE id = ?");
        let row = sqlx::query(&sql).bind(&id.0).fetch_optional(&self.pool).await?;
        row.map(quotation_from_row).transpose()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, Utc};

    use ordertrack_core::domain::quotation::NewQuotation;
    use ordertrack_core::domain::rfq::RfqId;
    use ordertrack_core::domain::work_order::WorkOrderId;

    use super::SqlQuotationRepository;
    use crate::repositories::{QuotationRepository, RepositoryError};
    use crate::{connect_with_settings, migrations, DbPool};

    const TS: &str = "2025-03-01T08:00:00.000000Z";

    async fn setup_with_work_order(id: &str) -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        sqlx::query(
            "INSERT INTO work_order (id, code, stage_status, created_by, created_at, updated_at)
             VALUES (?, 'WO-2025-0001', 'Pending', 'tester', ?, ?)",
        )
        .bind(id)
        .bind(TS)
        .bind(TS)
        .execute(&pool)
        .await
        .expect("insert work order");
        pool
    }

    async fn insert_rfq(pool: &DbPool, id: &str, work_order_id: &str) {
        sqlx::query(
            "INSERT INTO rfq (id, work_order_id, code, stage_status, created_at, updated_at)
             VALUES (?, ?, 'RFQ-2025-0001', 'Approved', ?, ?)",
        )
        .bind(id)
        .bind(work_order_id)
        .bind(TS)
        .bind(TS)
        .execute(pool)
        .await
        .expect("insert rfq");
    }

    fn new_quotation(work_order_id: &str) -> NewQuotation {
        NewQuotation {
            work_order_id: WorkOrderId(work_order_id.to_string()),
            assigned_to: Some("U-7".to_string()),
            remarks: None,
        }
    }

    #[tokio::test]
    async fn create_links_the_newest_rfq_and_opens_the_quotations_stage() {
        let pool = setup_with_work_order("wo-1").await;
        insert_rfq(&pool, "rfq-1", "wo-1").await;

        let repo = SqlQuotationRepository::new(pool.clone());
        let year = Utc::now().year();
        let quotation = repo.create(new_quotation("wo-1")).await.expect("create");

        assert_eq!(quotation.code, format!("QTN-{year}-0001"));
        assert_eq!(quotation.rfq_id, Some(RfqId("rfq-1".to_string())));
        assert_eq!(quotation.technical_recommendation_id, None);

        let stage: String =
            sqlx::query_scalar("SELECT stage_name FROM stage_event WHERE work_order_id = 'wo-1'")
                .fetch_one(&pool)
                .await
                .expect("stage event");
        assert_eq!(stage, "Quotations");

        assert_eq!(repo.get(&quotation.id).await.expect("get"), Some(quotation));
    }

    #[tokio::test]
    async fn create_without_rfq_or_recommendation_is_a_validation_error() {
        let pool = setup_with_work_order("wo-1").await;
        let repo = SqlQuotationRepository::new(pool.clone());

        let error = repo.create(new_quotation("wo-1")).await.expect_err("must fail");
        assert!(matches!(
            error,
            RepositoryError::Validation { ref fields }
                if fields == &["rfqId", "technicalRecommendationId"]
        ));

        // Nothing may survive the rolled-back transaction.
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM quotation")
            .fetch_one(&pool)
            .await
            .expect("count");
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn create_for_a_missing_work_order_is_not_found() {
        let pool = setup_with_work_order("wo-1").await;
        let repo = SqlQuotationRepository::new(pool);

        let error = repo.create(new_quotation("wo-missing")).await.expect_err("must fail");
        assert!(matches!(error, RepositoryError::NotFound { entity: "work order", .. }));
    }
}
