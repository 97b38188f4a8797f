//! Donation and pending-receipt storage.
//!
//! Implementations:
//! - `sqlite`: `SqliteDonationStore` / `SqlitePendingReceiptLog`
//! - `mock`: in-memory stores with failure toggles, for tests

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{Donation, IssuedReceipt};

pub mod mock;
#[cfg(feature = "sqlite")]
pub mod schema;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use mock::{MockDonationStore, MockPendingReceiptLog};
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteDonationStore, SqlitePendingReceiptLog};

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Donation not found: {0}")]
    NotFound(Uuid),

    /// A conditional write found the receipt already set.
    #[error("Receipt already issued for donation {donation_id}")]
    ReceiptAlreadyIssued {
        donation_id: Uuid,
        existing: Box<IssuedReceipt>,
    },

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// A certified receipt not yet written onto its donation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingReceipt {
    pub donation_id: Uuid,
    pub receipt: IssuedReceipt,
    pub recorded_at: DateTime<Utc>,
    /// Failed persistence attempts so far.
    pub attempts: u32,
}

impl PendingReceipt {
    pub fn new(donation_id: Uuid, receipt: IssuedReceipt) -> Self {
        Self {
            donation_id,
            receipt,
            recorded_at: Utc::now(),
            attempts: 0,
        }
    }
}

/// Donation persistence, as seen by the receipt pipeline.
#[async_trait]
pub trait DonationStore: Send + Sync {
    async fn insert(&self, donation: &Donation) -> Result<()>;

    async fn load(&self, id: Uuid) -> Result<Option<Donation>>;

    /// Overwrite the detail fields of a stored donation.
    ///
    /// With `require_unissued` the write only applies while no receipt is
    /// set; otherwise it fails with `ReceiptAlreadyIssued`. Receipt fields
    /// are never written here.
    async fn update_details(&self, donation: &Donation, require_unissued: bool) -> Result<()>;

    /// Delete a donation that has no receipt.
    async fn delete(&self, id: Uuid) -> Result<()>;

    /// Set all receipt fields at once, only if none are set yet.
    async fn persist_receipt(&self, id: Uuid, receipt: &IssuedReceipt) -> Result<()>;
}

/// Durable log of certified receipts awaiting persistence.
#[async_trait]
pub trait PendingReceiptLog: Send + Sync {
    /// Record a certified receipt. Recording an existing entry counts an attempt.
    async fn record(&self, pending: &PendingReceipt) -> Result<()>;

    async fn get(&self, donation_id: Uuid) -> Result<Option<PendingReceipt>>;

    /// All entries, oldest first.
    async fn list(&self) -> Result<Vec<PendingReceipt>>;

    async fn mark_attempt(&self, donation_id: Uuid) -> Result<()>;

    async fn remove(&self, donation_id: Uuid) -> Result<()>;
}

/// Open the SQLite database at the configured path and initialise both stores.
#[cfg(feature = "sqlite")]
pub async fn init_storage(
    config: &crate::config::StorageConfig,
) -> std::result::Result<
    (
        std::sync::Arc<dyn DonationStore>,
        std::sync::Arc<dyn PendingReceiptLog>,
    ),
    Box<dyn std::error::Error + Send + Sync>,
> {
    tracing::info!(path = %config.path, "Storage: sqlite");

    if let Some(parent) = std::path::Path::new(&config.path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let pool = sqlx::SqlitePool::connect(&config.connection_url()).await?;

    let donations = std::sync::Arc::new(SqliteDonationStore::new(pool.clone()));
    donations.init().await?;

    let pending = std::sync::Arc::new(SqlitePendingReceiptLog::new(pool));
    pending.init().await?;

    Ok((donations, pending))
}
