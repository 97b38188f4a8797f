//! SQLite PendingReceiptLog implementation.

use async_trait::async_trait;
use sea_query::{Expr, OnConflict, Order, Query, SqliteQueryBuilder};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{parse_timestamp, parse_uuid};
use crate::domain::IssuedReceipt;
use crate::storage::schema::{PendingReceipts, CREATE_PENDING_RECEIPTS_TABLE};
use crate::storage::{PendingReceipt, PendingReceiptLog, Result};

const COLUMNS: [PendingReceipts; 8] = [
    PendingReceipts::DonationId,
    PendingReceipts::Series,
    PendingReceipts::Number,
    PendingReceipts::DocumentUuid,
    PendingReceipts::DocumentUrl,
    PendingReceipts::IssuedAt,
    PendingReceipts::RecordedAt,
    PendingReceipts::Attempts,
];

/// SQLite implementation of PendingReceiptLog.
pub struct SqlitePendingReceiptLog {
    pool: SqlitePool,
}

impl SqlitePendingReceiptLog {
    /// Create a new SQLite pending-receipt log.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize the database schema.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(CREATE_PENDING_RECEIPTS_TABLE)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn row_to_pending(row: &SqliteRow) -> Result<PendingReceipt> {
    let donation_id: String = row.try_get("donation_id")?;
    let issued_at: String = row.try_get("issued_at")?;
    let recorded_at: String = row.try_get("recorded_at")?;
    let attempts: i64 = row.try_get("attempts")?;

    Ok(PendingReceipt {
        donation_id: parse_uuid("donation_id", &donation_id)?,
        receipt: IssuedReceipt {
            series: row.try_get("series")?,
            number: row.try_get("number")?,
            document_uuid: row.try_get("document_uuid")?,
            document_url: row.try_get("document_url")?,
            issued_at: parse_timestamp("issued_at", &issued_at)?,
        },
        recorded_at: parse_timestamp("recorded_at", &recorded_at)?,
        attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
    })
}

#[async_trait]
impl PendingReceiptLog for SqlitePendingReceiptLog {
    async fn record(&self, pending: &PendingReceipt) -> Result<()> {
        let receipt = &pending.receipt;
        let query = Query::insert()
            .into_table(PendingReceipts::Table)
            .columns(COLUMNS)
            .values_panic([
                pending.donation_id.to_string().into(),
                receipt.series.as_str().into(),
                receipt.number.as_str().into(),
                receipt.document_uuid.as_str().into(),
                receipt.document_url.as_str().into(),
                receipt.issued_at.to_rfc3339().into(),
                pending.recorded_at.to_rfc3339().into(),
                pending.attempts.into(),
            ])
            .on_conflict(
                OnConflict::column(PendingReceipts::DonationId)
                    .value(
                        PendingReceipts::Attempts,
                        Expr::col(PendingReceipts::Attempts).add(1),
                    )
                    .to_owned(),
            )
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }

    async fn get(&self, donation_id: Uuid) -> Result<Option<PendingReceipt>> {
        let query = Query::select()
            .columns(COLUMNS)
            .from(PendingReceipts::Table)
            .and_where(Expr::col(PendingReceipts::DonationId).eq(donation_id.to_string()))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        row.as_ref().map(row_to_pending).transpose()
    }

    async fn list(&self) -> Result<Vec<PendingReceipt>> {
        let query = Query::select()
            .columns(COLUMNS)
            .from(PendingReceipts::Table)
            .order_by(PendingReceipts::RecordedAt, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_pending).collect()
    }

    async fn mark_attempt(&self, donation_id: Uuid) -> Result<()> {
        let query = Query::update()
            .table(PendingReceipts::Table)
            .value(
                PendingReceipts::Attempts,
                Expr::col(PendingReceipts::Attempts).add(1),
            )
            .and_where(Expr::col(PendingReceipts::DonationId).eq(donation_id.to_string()))
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }

    async fn remove(&self, donation_id: Uuid) -> Result<()> {
        let query = Query::delete()
            .from_table(PendingReceipts::Table)
            .and_where(Expr::col(PendingReceipts::DonationId).eq(donation_id.to_string()))
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }
}
