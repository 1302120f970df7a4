//! RFQ persistence: creation (sequence code + opening stage) and the
//! desired-state reconciliation executor.
//!
//! `apply_desired_state` runs the whole §reconciliation inside one
//! transaction: normalize aliases, diff each collection by natural key,
//! apply deletes/updates/inserts, optionally append a new RFQ stage event,
//! then re-read the children with the selected-quote projection applied.
//! Any failing step rolls the entire transaction back; callers never see a
//! half-reconciled RFQ.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Datelike, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};
use tracing::debug;
use uuid::Uuid;

use ordertrack_core::config::RetryConfig;
use ordertrack_core::domain::rfq::{
    NewRfq, Rfq, RfqDesiredState, RfqDetail, RfqId, RfqItem, RfqItemVendorQuote, RfqVendor,
};
use ordertrack_core::domain::stage::{NewStageEvent, StageStatus};
use ordertrack_core::domain::work_order::WorkOrderId;
use ordertrack_core::reconcile::{
    apply_selected_quotes, normalize_desired_state, plan_reconcile, NormalizedItem,
    NormalizedQuote, NormalizedRfqState, NormalizedVendor, QuoteKey,
};
use ordertrack_core::routing::StageModule;

use super::{
    fmt_ts, parse_decimal, parse_timestamp, parse_u32, sequence, stage_log, RepositoryError,
    RfqRepository,
};
use crate::retry::{with_conflict_retry, with_request_timeout};
use crate::DbPool;

const RFQ_COLUMNS: &str =
    "id, work_order_id, code, assigned_to, stage_status, remarks, created_at, updated_at";

pub struct SqlRfqRepository {
    pool: DbPool,
    retry: RetryConfig,
    request_timeout: Duration,
}

impl SqlRfqRepository {
    pub fn new(pool: DbPool) -> Self {
        Self::with_limits(pool, RetryConfig::default(), Duration::from_secs(30))
    }

    pub fn with_limits(pool: DbPool, retry: RetryConfig, request_timeout: Duration) -> Self {
        Self { pool, retry, request_timeout }
    }

    async fn create_once(&self, new: &NewRfq) -> Result<Rfq, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        stage_log::fetch_work_order_account(&mut tx, &new.work_order_id).await?;

        let now = Utc::now();
        let code = sequence::next_code(&mut tx, StageModule::Rfq, now.year()).await?;
        let id = Uuid::new_v4().to_string();
        let status = StageModule::Rfq.assigned_status();

        sqlx::query(
            "INSERT INTO rfq (id, work_order_id, code, assigned_to, stage_status, remarks, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&new.work_order_id.0)
        .bind(&code)
        .bind(new.assigned_to.as_deref())
        .bind(status.as_str())
        .bind(new.remarks.as_deref())
        .bind(fmt_ts(now))
        .bind(fmt_ts(now))
        .execute(&mut *tx)
        .await
        .map_err(|error| RepositoryError::classify(error, "rfq code"))?;

        stage_log::insert_event(
            &mut tx,
            &NewStageEvent {
                work_order_id: new.work_order_id.clone(),
                stage: StageModule::Rfq,
                status,
                assigned_to: new.assigned_to.clone(),
                notified: false,
                remarks: new.remarks.clone(),
            },
            now,
        )
        .await?;

        let row = sqlx::query(&format!("SELECT {RFQ_COLUMNS} FROM rfq WHERE id = ?"))
            .bind(&id)
            .fetch_one(&mut *tx)
            .await?;
        let stored = rfq_from_row(row)?;
        tx.commit().await?;
        Ok(stored)
    }

    async fn apply_once(
        &self,
        id: &RfqId,
        desired: &RfqDesiredState,
        normalized: &NormalizedRfqState,
    ) -> Result<RfqDetail, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!("SELECT {RFQ_COLUMNS} FROM rfq WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            return Err(RepositoryError::NotFound { entity: "rfq", id: id.0.clone() });
        };
        let rfq = rfq_from_row(row)?;
        let now = Utc::now();

        reconcile_items(&mut tx, id, &normalized.items, now).await?;
        reconcile_vendors(&mut tx, id, &normalized.vendors, now).await?;
        reconcile_quotes(&mut tx, id, &normalized.quotes, now).await?;

        sqlx::query(
            "UPDATE rfq SET assigned_to = COALESCE(?, assigned_to), remarks = COALESCE(?, remarks), updated_at = ? WHERE id = ?",
        )
        .bind(desired.assigned_to.as_deref())
        .bind(desired.remarks.as_deref())
        .bind(fmt_ts(now))
        .bind(&id.0)
        .execute(&mut *tx)
        .await?;

        if let Some(status) = &desired.status {
            stage_log::insert_event(
                &mut tx,
                &NewStageEvent {
                    work_order_id: rfq.work_order_id.clone(),
                    stage: StageModule::Rfq,
                    status: status.clone(),
                    assigned_to: desired.assigned_to.clone().or_else(|| rfq.assigned_to.clone()),
                    notified: false,
                    remarks: desired.remarks.clone(),
                },
                now,
            )
            .await?;
            stage_log::propagate_status(&mut tx, StageModule::Rfq, &rfq.work_order_id, None, status, now)
                .await?;
        }

        let detail = load_detail(&mut tx, id).await?;
        tx.commit().await?;
        debug!(rfq = %id.0, items = detail.items.len(), vendors = detail.vendors.len(), quotes = detail.quotes.len(), "rfq reconciled");
        Ok(detail)
    }
}

// ---------------------------------------------------------------------------
// Per-collection reconciliation
// ---------------------------------------------------------------------------

async fn reconcile_items(
    conn: &mut SqliteConnection,
    rfq_id: &RfqId,
    incoming: &[NormalizedItem],
    now: DateTime<Utc>,
) -> Result<(), RepositoryError> {
    let persisted: HashSet<String> =
        sqlx::query_scalar("SELECT item_id FROM rfq_item WHERE rfq_id = ?")
            .bind(&rfq_id.0)
            .fetch_all(&mut *conn)
            .await?
            .into_iter()
            .collect();

    let plan = plan_reconcile(
        &persisted,
        incoming.iter().map(|item| (item.item_id.clone(), item.clone())).collect(),
    );

    for item_id in &plan.to_delete {
        sqlx::query("DELETE FROM rfq_item WHERE rfq_id = ? AND item_id = ?")
            .bind(&rfq_id.0)
            .bind(item_id)
            .execute(&mut *conn)
            .await?;
    }

    for (item_id, item) in &plan.to_update {
        let amount = RfqItem::line_amount(item.quantity, item.unit_price);
        sqlx::query(
            "UPDATE rfq_item SET description = ?, quantity = ?, unit_price = ?, amount = ?, lead_time = ?, updated_at = ?
             WHERE rfq_id = ? AND item_id = ?",
        )
        .bind(item.description.as_deref())
        .bind(i64::from(item.quantity))
        .bind(item.unit_price.to_string())
        .bind(amount.to_string())
        .bind(item.lead_time.as_deref())
        .bind(fmt_ts(now))
        .bind(&rfq_id.0)
        .bind(item_id)
        .execute(&mut *conn)
        .await?;
    }

    for (item_id, item) in &plan.to_insert {
        let amount = RfqItem::line_amount(item.quantity, item.unit_price);
        sqlx::query(
            "INSERT INTO rfq_item (id, rfq_id, item_id, description, quantity, unit_price, amount, lead_time, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&rfq_id.0)
        .bind(item_id)
        .bind(item.description.as_deref())
        .bind(i64::from(item.quantity))
        .bind(item.unit_price.to_string())
        .bind(amount.to_string())
        .bind(item.lead_time.as_deref())
        .bind(fmt_ts(now))
        .bind(fmt_ts(now))
        .execute(&mut *conn)
        .await
        .map_err(|error| RepositoryError::classify(error, "rfq item key"))?;
    }

    Ok(())
}

async fn reconcile_vendors(
    conn: &mut SqliteConnection,
    rfq_id: &RfqId,
    incoming: &[NormalizedVendor],
    now: DateTime<Utc>,
) -> Result<(), RepositoryError> {
    let persisted: HashSet<String> =
        sqlx::query_scalar("SELECT vendor_id FROM rfq_vendor WHERE rfq_id = ?")
            .bind(&rfq_id.0)
            .fetch_all(&mut *conn)
            .await?
            .into_iter()
            .collect();

    let plan = plan_reconcile(
        &persisted,
        incoming.iter().map(|vendor| (vendor.vendor_id.clone(), vendor.clone())).collect(),
    );

    for vendor_id in &plan.to_delete {
        sqlx::query("DELETE FROM rfq_vendor WHERE rfq_id = ? AND vendor_id = ?")
            .bind(&rfq_id.0)
            .bind(vendor_id)
            .execute(&mut *conn)
            .await?;
    }

    for (vendor_id, vendor) in &plan.to_update {
        sqlx::query(
            "UPDATE rfq_vendor SET name = ?, contact_person = ?, payment_terms = ?, updated_at = ?
             WHERE rfq_id = ? AND vendor_id = ?",
        )
        .bind(vendor.name.as_deref())
        .bind(vendor.contact_person.as_deref())
        .bind(vendor.payment_terms.as_deref())
        .bind(fmt_ts(now))
        .bind(&rfq_id.0)
        .bind(vendor_id)
        .execute(&mut *conn)
        .await?;
    }

    for (vendor_id, vendor) in &plan.to_insert {
        sqlx::query(
            "INSERT INTO rfq_vendor (id, rfq_id, vendor_id, name, contact_person, payment_terms, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&rfq_id.0)
        .bind(vendor_id)
        .bind(vendor.name.as_deref())
        .bind(vendor.contact_person.as_deref())
        .bind(vendor.payment_terms.as_deref())
        .bind(fmt_ts(now))
        .bind(fmt_ts(now))
        .execute(&mut *conn)
        .await
        .map_err(|error| RepositoryError::classify(error, "rfq vendor key"))?;
    }

    Ok(())
}

async fn reconcile_quotes(
    conn: &mut SqliteConnection,
    rfq_id: &RfqId,
    incoming: &[NormalizedQuote],
    now: DateTime<Utc>,
) -> Result<(), RepositoryError> {
    let persisted: HashSet<QuoteKey> =
        sqlx::query("SELECT vendor_id, item_id FROM rfq_item_vendor_quote WHERE rfq_id = ?")
            .bind(&rfq_id.0)
            .fetch_all(&mut *conn)
            .await?
            .into_iter()
            .map(|row| {
                Ok::<QuoteKey, RepositoryError>((
                    row.try_get("vendor_id")?,
                    row.try_get("item_id")?,
                ))
            })
            .collect::<Result<_, _>>()?;

    let plan = plan_reconcile(
        &persisted,
        incoming.iter().map(|quote| (quote.key(), quote.clone())).collect(),
    );

    for (vendor_id, item_id) in &plan.to_delete {
        sqlx::query(
            "DELETE FROM rfq_item_vendor_quote WHERE rfq_id = ? AND vendor_id = ? AND item_id = ?",
        )
        .bind(&rfq_id.0)
        .bind(vendor_id)
        .bind(item_id)
        .execute(&mut *conn)
        .await?;
    }

    for ((vendor_id, item_id), quote) in &plan.to_update {
        sqlx::query(
            "UPDATE rfq_item_vendor_quote SET unit_price = ?, lead_time = ?, is_selected = ?, notes = ?, updated_at = ?
             WHERE rfq_id = ? AND vendor_id = ? AND item_id = ?",
        )
        .bind(quote.unit_price.to_string())
        .bind(quote.lead_time.as_deref())
        .bind(quote.is_selected)
        .bind(quote.notes.as_deref())
        .bind(fmt_ts(now))
        .bind(&rfq_id.0)
        .bind(vendor_id)
        .bind(item_id)
        .execute(&mut *conn)
        .await?;
    }

    for ((vendor_id, item_id), quote) in &plan.to_insert {
        sqlx::query(
            "INSERT INTO rfq_item_vendor_quote (id, rfq_id, item_id, vendor_id, unit_price, lead_time, is_selected, notes, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&rfq_id.0)
        .bind(item_id)
        .bind(vendor_id)
        .bind(quote.unit_price.to_string())
        .bind(quote.lead_time.as_deref())
        .bind(quote.is_selected)
        .bind(quote.notes.as_deref())
        .bind(fmt_ts(now))
        .bind(fmt_ts(now))
        .execute(&mut *conn)
        .await
        .map_err(|error| RepositoryError::classify(error, "rfq quote key"))?;
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Row mapping and detail loading
// ---------------------------------------------------------------------------

fn rfq_from_row(row: SqliteRow) -> Result<Rfq, RepositoryError> {
    let status: String = row.try_get("stage_status")?;
    Ok(Rfq {
        id: RfqId(row.try_get("id")?),
        work_order_id: WorkOrderId(row.try_get("work_order_id")?),
        code: row.try_get("code")?,
        assigned_to: row.try_get("assigned_to")?,
        stage_status: StageStatus::parse(&status),
        remarks: row.try_get("remarks")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn item_from_row(row: SqliteRow) -> Result<RfqItem, RepositoryError> {
    Ok(RfqItem {
        id: row.try_get("id")?,
        rfq_id: RfqId(row.try_get("rfq_id")?),
        item_id: row.try_get("item_id")?,
        description: row.try_get("description")?,
        quantity: parse_u32("quantity", row.try_get("quantity")?)?,
        unit_price: parse_decimal("unit_price", row.try_get("unit_price")?)?,
        amount: parse_decimal("amount", row.try_get("amount")?)?,
        lead_time: row.try_get("lead_time")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn vendor_from_row(row: SqliteRow) -> Result<RfqVendor, RepositoryError> {
    Ok(RfqVendor {
        id: row.try_get("id")?,
        rfq_id: RfqId(row.try_get("rfq_id")?),
        vendor_id: row.try_get("vendor_id")?,
        name: row.try_get("name")?,
        contact_person: row.try_get("contact_person")?,
        payment_terms: row.try_get("payment_terms")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn quote_from_row(row: SqliteRow) -> Result<RfqItemVendorQuote, RepositoryError> {
    Ok(RfqItemVendorQuote {
        id: row.try_get("id")?,
        rfq_id: RfqId(row.try_get("rfq_id")?),
        item_id: row.try_get("item_id")?,
        vendor_id: row.try_get("vendor_id")?,
        unit_price: parse_decimal("unit_price", row.try_get("unit_price")?)?,
        lead_time: row.try_get("lead_time")?,
        is_selected: row.try_get("is_selected")?,
        notes: row.try_get("notes")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

/// Load the full RFQ with the selected-quote projection applied to items.
async fn load_detail(
    conn: &mut SqliteConnection,
    id: &RfqId,
) -> Result<RfqDetail, RepositoryError> {
    let row = sqlx::query(&format!("SELECT {RFQ_COLUMNS} FROM rfq WHERE id = ?"))
        .bind(&id.0)
        .fetch_one(&mut *conn)
        .await?;
    let rfq = rfq_from_row(row)?;

    let mut items = sqlx::query(
        "SELECT id, rfq_id, item_id, description, quantity, unit_price, amount, lead_time, created_at, updated_at
         FROM rfq_item WHERE rfq_id = ? ORDER BY item_id ASC",
    )
    .bind(&id.0)
    .fetch_all(&mut *conn)
    .await?
    .into_iter()
    .map(item_from_row)
    .collect::<Result<Vec<_>, _>>()?;

    let vendors = sqlx::query(
        "SELECT id, rfq_id, vendor_id, name, contact_person, payment_terms, created_at, updated_at
         FROM rfq_vendor WHERE rfq_id = ? ORDER BY vendor_id ASC",
    )
    .bind(&id.0)
    .fetch_all(&mut *conn)
    .await?
    .into_iter()
    .map(vendor_from_row)
    .collect::<Result<Vec<_>, _>>()?;

    let quotes = sqlx::query(
        "SELECT id, rfq_id, item_id, vendor_id, unit_price, lead_time, is_selected, notes, created_at, updated_at
         FROM rfq_item_vendor_quote WHERE rfq_id = ? ORDER BY item_id ASC, vendor_id ASC",
    )
    .bind(&id.0)
    .fetch_all(&mut *conn)
    .await?
    .into_iter()
    .map(quote_from_row)
    .collect::<Result<Vec<_>, _>>()?;

    apply_selected_quotes(&mut items, &quotes);
    Ok(RfqDetail { rfq, items, vendors, quotes })
}

#[async_trait::async_trait]
impl RfqRepository for SqlRfqRepository {
    async fn create(&self, new: NewRfq) -> Result<Rfq, RepositoryError> {
        with_request_timeout(
            self.request_timeout,
            with_conflict_retry(&self.retry, |_| self.create_once(&new)),
        )
        .await
    }

    async fn get_detail(&self, id: &RfqId) -> Result<Option<RfqDetail>, RepositoryError> {
        let exists: Option<String> = sqlx::query_scalar("SELECT id FROM rfq WHERE id = ?")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_none() {
            return Ok(None);
        }
        let mut conn = self.pool.acquire().await?;
        load_detail(&mut conn, id).await.map(Some)
    }

    async fn apply_desired_state(
        &self,
        id: &RfqId,
        desired: RfqDesiredState,
    ) -> Result<RfqDetail, RepositoryError> {
        let normalized = normalize_desired_state(&desired)?;
        with_request_timeout(
            self.request_timeout,
            with_conflict_retry(&self.retry, |_| self.apply_once(id, &desired, &normalized)),
        )
        .await
    }
}
