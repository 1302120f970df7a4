use std::time::Duration;

use chrono::{Datelike, Utc};
use sqlx::{sqlite::SqliteRow, Row};
use uuid::Uuid;

use ordertrack_core::config::RetryConfig;
use ordertrack_core::domain::account::{Account, AccountId, NewAccount};
use ordertrack_core::domain::stage::{NewStageEvent, StageStatus};
use ordertrack_core::domain::work_order::WorkOrderId;
use ordertrack_core::routing::StageModule;

use super::{fmt_ts, parse_timestamp, sequence, stage_log, AccountRepository, RepositoryError};
use crate::retry::{with_conflict_retry, with_request_timeout};
use crate::DbPool;

const ACCOUNT_COLUMNS: &str = "id, code, name, stage_status, created_at, updated_at";

pub struct SqlAccountRepository {
    pool: DbPool,
    retry: RetryConfig,
    request_timeout: Duration,
}

impl SqlAccountRepository {
    pub fn new(pool: DbPool) -> Self {
        Self::with_limits(pool, RetryConfig::default(), Duration::from_secs(30))
    }

    pub fn with_limits(pool: DbPool, retry: RetryConfig, request_timeout: Duration) -> Self {
        Self { pool, retry, request_timeout }
    }

    /// NAEF enrollment: account row, work-order link, and the opening Draft
    /// stage event in one transaction.
    async fn enroll_once(
        &self,
        work_order_id: &WorkOrderId,
        new: &NewAccount,
    ) -> Result<Account, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        stage_log::fetch_work_order_account(&mut tx, work_order_id).await?;

        let now = Utc::now();
        let code = sequence::next_code(&mut tx, StageModule::Account, now.year()).await?;
        let id = Uuid::new_v4().to_string();
        let status = StageModule::Account.assigned_status();

        sqlx::query(
            "INSERT INTO account (id, code, name, stage_status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&code)
        .bind(&new.name)
        .bind(status.as_str())
        .bind(fmt_ts(now))
        .bind(fmt_ts(now))
        .execute(&mut *tx)
        .await
        .map_err(|error| RepositoryError::classify(error, "account code"))?;

        sqlx::query("UPDATE work_order SET account_id = ?, updated_at = ? WHERE id = ?")
            .bind(&id)
            .bind(fmt_ts(now))
            .bind(&work_order_id.0)
            .execute(&mut *tx)
            .await?;

        stage_log::insert_event(
            &mut tx,
            &NewStageEvent {
                work_order_id: work_order_id.clone(),
                stage: StageModule::Account,
                status,
                assigned_to: new.assigned_to.clone(),
                notified: false,
                remarks: None,
            },
            now,
        )
        .await?;

        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM account WHERE id = ?");
        let row = sqlx::query(&sql).bind(&id).fetch_one(&mut *tx).await?;
        let stored = account_from_row(row)?;
        tx.commit().await?;
        Ok(stored)
    }
}

fn account_from_row(row: SqliteRow) -> Result<Account, RepositoryError> {
    let status: String = row.try_get("stage_status")?;
    Ok(Account {
        id: AccountId(row.try_get("id")?),
        code: row.try_get("code")?,
        name: row.try_get("name")?,
        stage_status: StageStatus::parse(&status),
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

#[async_trait::async_trait]
impl AccountRepository for SqlAccountRepository {
    async fn enroll(
        &self,
        work_order_id: &WorkOrderId,
        new: NewAccount,
    ) -> Result<Account, RepositoryError> {
        with_request_timeout(
            self.request_timeout,
            with_conflict_retry(&self.retry, |_| self.enroll_once(work_order_id, &new)),
        )
        .await
    }

    async fn get(&self, id: &AccountId) -> Result<Option<Account>, RepositoryError> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM account WHERE id = ?");
        let row = sqlx::query(&sql).bind(&id.0).fetch_optional(&self.pool).await?;
        row.map(account_from_row).transpose()
    }
}
