use std::time::Duration;

use chrono::{Datelike, Utc};
use sqlx::{sqlite::SqliteRow, Row};
use uuid::Uuid;

use ordertrack_core::config::RetryConfig;
use ordertrack_core::domain::stage::{NewStageEvent, StageStatus};
use ordertrack_core::domain::technical_recommendation::{
    NewTechnicalRecommendation, TechnicalRecommendation, TechnicalRecommendationId,
};
use ordertrack_core::domain::work_order::WorkOrderId;
use ordertrack_core::routing::StageModule;

use super::{
    fmt_ts, parse_timestamp, sequence, stage_log, RepositoryError,
    TechnicalRecommendationRepository,
};
use crate::retry::{with_conflict_retry, with_request_timeout};
use crate::DbPool;

const TR_COLUMNS: &str =
    "id, work_order_id, code, details, assigned_to, stage_status, created_at, updated_at";

pub struct SqlTechnicalRecommendationRepository {
    pool: DbPool,
    retry: RetryConfig,
    request_timeout: Duration,
}

impl SqlTechnicalRecommendationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self::with_limits(pool, RetryConfig::default(), Duration::from_secs(30))
    }

    pub fn with_limits(pool: DbPool, retry: RetryConfig, request_timeout: Duration) -> Self {
        Self { pool, retry, request_timeout }
    }

    async fn create_once(
        &self,
        new: &NewTechnicalRecommendation,
    ) -> Result<TechnicalRecommendation, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        stage_log::fetch_work_order_account(&mut tx, &new.work_order_id).await?;

        let now = Utc::now();
        let code =
            sequence::next_code(&mut tx, StageModule::TechnicalRecommendation, now.year()).await?;
        let id = Uuid::new_v4().to_string();
        let status = StageModule::TechnicalRecommendation.assigned_status();

        sqlx::query(
            "INSERT INTO technical_recommendation (id, work_order_id, code, details, assigned_to, stage_status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&new.work_order_id.0)
        .bind(&code)
        .bind(new.details.as_deref())
        .bind(new.assigned_to.as_deref())
        .bind(status.as_str())
        .bind(fmt_ts(now))
        .bind(fmt_ts(now))
        .execute(&mut *tx)
        .await
        .map_err(|error| RepositoryError::classify(error, "technical recommendation code"))?;

        stage_log::insert_event(
            &mut tx,
            &NewStageEvent {
                work_order_id: new.work_order_id.clone(),
                stage: StageModule::TechnicalRecommendation,
                status,
                assigned_to: new.assigned_to.clone(),
                notified: false,
                remarks: None,
            },
            now,
        )
        .await?;

        let sql = format!("SELECT {TR_COLUMNS} FROM technical_recommendation WHERE id = ?");
        let row = sqlx::query(&sql).bind(&id).fetch_one(&mut *tx).await?;
        let stored = technical_recommendation_from_row(row)?;
        tx.commit().await?;
        Ok(stored)
    }
}

fn technical_recommendation_from_row(
    row: SqliteRow,
) -> Result<TechnicalRecommendation, RepositoryError> {
    let status: String = row.try_get("stage_status")?;
    Ok(TechnicalRecommendation {
        id: TechnicalRecommendationId(row.try_get("id")?),
        work_order_id: WorkOrderId(row.try_get("work_order_id")?),
        code: row.try_get("code")?,
        details: row.try_get("details")?,
        assigned_to: row.try_get("assigned_to")?,
        stage_status: StageStatus::parse(&status),
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

#[async_trait::async_trait]
impl TechnicalRecommendationRepository for SqlTechnicalRecommendationRepository {
    async fn create(
        &self,
        new: NewTechnicalRecommendation,
    ) -> Result<TechnicalRecommendation, RepositoryError> {
        with_request_timeout(
            self.request_timeout,
            with_conflict_retry(&self.retry, |_| self.create_once(&new)),
        )
        .await
    }

    async fn get(
        &self,
        id: &TechnicalRecommendationId,
    ) -> Result<Option<TechnicalRecommendation>, RepositoryError> {
        let sql = format!("SELECT {TR_COLUMNS} FROM technical_recommendation WHERE id = ?");
        let row = sqlx::query(&sql).bind(&id.0).fetch_optional(&self.pool).await?;
        row.map(technical_recommendation_from_row).transpose()
    }

    async fn find_by_work_order(
        &self,
        work_order_id: &WorkOrderId,
    ) -> Result<Vec<TechnicalRecommendation>, RepositoryError> {
        let sql = format!(
            "SELECT {TR_COLUMNS} FROM technical_recommendation WHERE work_order_id = ? ORDER BY created_at ASC, code ASC"
        );
        let rows = sqlx::query(&sql).bind(&work_order_id.0).fetch_all(&self.pool).await?;
        rows.into_iter().map(technical_recommendation_from_row).collect()
    }
}
