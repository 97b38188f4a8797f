//! SQLite DonationStore implementation.

use async_trait::async_trait;
use chrono::Utc;
use sea_query::{Expr, Query, SimpleExpr, SqliteQueryBuilder};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use super::{parse_decimal, parse_timestamp, parse_uuid};
use crate::domain::{Donation, DonationKind, Donor, IssuedReceipt};
use crate::storage::schema::{Donations, CREATE_DONATIONS_TABLE};
use crate::storage::{DonationStore, Result, StorageError};

const COLUMNS: [Donations; 17] = [
    Donations::Id,
    Donations::Kind,
    Donations::DonorName,
    Donations::DonorTaxId,
    Donations::DonorAddress,
    Donations::Amount,
    Donations::EstimatedValue,
    Donations::Description,
    Donations::Notes,
    Donations::ReceiptIssued,
    Donations::Series,
    Donations::Number,
    Donations::DocumentUuid,
    Donations::DocumentUrl,
    Donations::IssuedAt,
    Donations::CreatedAt,
    Donations::UpdatedAt,
];

/// SQLite implementation of DonationStore.
pub struct SqliteDonationStore {
    pool: SqlitePool,
}

impl SqliteDonationStore {
    /// Create a new SQLite donation store.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize the database schema.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(CREATE_DONATIONS_TABLE)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Explain why a conditional write on `id` matched no row.
    async fn conflict(&self, id: Uuid) -> StorageError {
        match self.load(id).await {
            Ok(None) => StorageError::NotFound(id),
            Ok(Some(Donation {
                receipt: Some(existing),
                ..
            })) => StorageError::ReceiptAlreadyIssued {
                donation_id: id,
                existing: Box::new(existing),
            },
            Ok(Some(_)) => StorageError::Unavailable(format!(
                "conditional write on donation {} matched no row",
                id
            )),
            Err(e) => e,
        }
    }
}

fn detail_values(donation: &Donation) -> Vec<(Donations, SimpleExpr)> {
    vec![
        (Donations::Kind, donation.kind.as_str().into()),
        (Donations::DonorName, donation.donor.name.as_str().into()),
        (Donations::DonorTaxId, donation.donor.tax_id.clone().into()),
        (Donations::DonorAddress, donation.donor.address.clone().into()),
        (Donations::Amount, donation.amount.map(|d| d.to_string()).into()),
        (
            Donations::EstimatedValue,
            donation.estimated_value.map(|d| d.to_string()).into(),
        ),
        (Donations::Description, donation.description.clone().into()),
        (Donations::Notes, donation.notes.clone().into()),
        (Donations::UpdatedAt, donation.updated_at.to_rfc3339().into()),
    ]
}

fn row_to_donation(row: &SqliteRow) -> Result<Donation> {
    let id: String = row.try_get("id")?;
    let id = parse_uuid("id", &id)?;

    let kind: String = row.try_get("kind")?;
    let kind: DonationKind = kind
        .parse()
        .map_err(|_| StorageError::Corrupt(format!("kind: unknown donation kind '{}'", kind)))?;

    let issued: i64 = row.try_get("receipt_issued")?;
    let series: Option<String> = row.try_get("series")?;
    let number: Option<String> = row.try_get("number")?;
    let document_uuid: Option<String> = row.try_get("document_uuid")?;
    let document_url: Option<String> = row.try_get("document_url")?;
    let issued_at: Option<String> = row.try_get("issued_at")?;

    let receipt = match (issued, series, number, document_uuid, document_url, issued_at) {
        (0, None, None, None, None, None) => None,
        (1, Some(series), Some(number), Some(document_uuid), Some(document_url), Some(at)) => {
            Some(IssuedReceipt {
                series,
                number,
                document_uuid,
                document_url,
                issued_at: parse_timestamp("issued_at", &at)?,
            })
        }
        _ => {
            return Err(StorageError::Corrupt(format!(
                "donation {}: inconsistent receipt fields",
                id
            )))
        }
    };

    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(Donation {
        id,
        kind,
        donor: Donor {
            name: row.try_get("donor_name")?,
            tax_id: row.try_get("donor_tax_id")?,
            address: row.try_get("donor_address")?,
        },
        amount: parse_decimal("amount", row.try_get("amount")?)?,
        estimated_value: parse_decimal("estimated_value", row.try_get("estimated_value")?)?,
        description: row.try_get("description")?,
        notes: row.try_get("notes")?,
        receipt,
        created_at: parse_timestamp("created_at", &created_at)?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
    })
}

#[async_trait]
impl DonationStore for SqliteDonationStore {
    async fn insert(&self, donation: &Donation) -> Result<()> {
        let receipt = donation.receipt.as_ref();
        let query = Query::insert()
            .into_table(Donations::Table)
            .columns(COLUMNS)
            .values_panic([
                donation.id.to_string().into(),
                donation.kind.as_str().into(),
                donation.donor.name.as_str().into(),
                donation.donor.tax_id.clone().into(),
                donation.donor.address.clone().into(),
                donation.amount.map(|d| d.to_string()).into(),
                donation.estimated_value.map(|d| d.to_string()).into(),
                donation.description.clone().into(),
                donation.notes.clone().into(),
                i32::from(receipt.is_some()).into(),
                receipt.map(|r| r.series.clone()).into(),
                receipt.map(|r| r.number.clone()).into(),
                receipt.map(|r| r.document_uuid.clone()).into(),
                receipt.map(|r| r.document_url.clone()).into(),
                receipt.map(|r| r.issued_at.to_rfc3339()).into(),
                donation.created_at.to_rfc3339().into(),
                donation.updated_at.to_rfc3339().into(),
            ])
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }

    async fn load(&self, id: Uuid) -> Result<Option<Donation>> {
        let query = Query::select()
            .columns(COLUMNS)
            .from(Donations::Table)
            .and_where(Expr::col(Donations::Id).eq(id.to_string()))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        row.as_ref().map(row_to_donation).transpose()
    }

    async fn update_details(&self, donation: &Donation, require_unissued: bool) -> Result<()> {
        // The statement is not Send; it must be gone before the await.
        let query = {
            let mut statement = Query::update();
            statement
                .table(Donations::Table)
                .values(detail_values(donation))
                .and_where(Expr::col(Donations::Id).eq(donation.id.to_string()));
            if require_unissued {
                statement.and_where(Expr::col(Donations::ReceiptIssued).eq(0));
            }
            statement.to_string(SqliteQueryBuilder)
        };

        let result = sqlx::query(&query).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(self.conflict(donation.id).await);
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let query = Query::delete()
            .from_table(Donations::Table)
            .and_where(Expr::col(Donations::Id).eq(id.to_string()))
            .and_where(Expr::col(Donations::ReceiptIssued).eq(0))
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(self.conflict(id).await);
        }
        debug!(donation_id = %id, "Donation deleted");
        Ok(())
    }

    async fn persist_receipt(&self, id: Uuid, receipt: &IssuedReceipt) -> Result<()> {
        let query = Query::update()
            .table(Donations::Table)
            .values([
                (Donations::ReceiptIssued, 1.into()),
                (Donations::Series, receipt.series.as_str().into()),
                (Donations::Number, receipt.number.as_str().into()),
                (Donations::DocumentUuid, receipt.document_uuid.as_str().into()),
                (Donations::DocumentUrl, receipt.document_url.as_str().into()),
                (Donations::IssuedAt, receipt.issued_at.to_rfc3339().into()),
                (Donations::UpdatedAt, Utc::now().to_rfc3339().into()),
            ])
            .and_where(Expr::col(Donations::Id).eq(id.to_string()))
            .and_where(Expr::col(Donations::ReceiptIssued).eq(0))
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(self.conflict(id).await);
        }
        debug!(donation_id = %id, document_uuid = %receipt.document_uuid, "Receipt persisted");
        Ok(())
    }
}
