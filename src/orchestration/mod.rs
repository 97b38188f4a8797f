//! Receipt issuance orchestration.
//!
//! `ReceiptIssuer::issue` drives one donation through
//! `Building → Signing → Certifying → Persisting → Done` under a
//! per-donation lock:
//!
//! - an issued donation short-circuits to its stored receipt
//! - a certified-but-unpersisted receipt (side-log entry) is persisted
//!   again, never re-certified
//! - missing donor data fails before any remote call
//! - sign and certify get the single auth-refresh retry; other remote
//!   failures are terminal for the attempt
//! - persistence runs on its own task, so dropping the caller's future
//!   cannot abandon a certified receipt
//! - a receipt that reached neither the donation nor the side-log is held in
//!   memory and persisted by the next attempt instead of re-certifying

mod locks;
mod retry;


use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use backon::{ConstantBuilder, Retryable};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::authority::{AuthorityError, CertificationClient, RemoteErrorKind};
use crate::document::DocumentBuilder;
use crate::domain::{Donation, IssuedReceipt, ValidationError};
use crate::guard;
use crate::storage::{DonationStore, PendingReceipt, PendingReceiptLog, StorageError};

pub use locks::{DonationLockGuard, DonationLocks};
pub use retry::RetryPolicy;

/// Retries of a failed side-log write before the receipt is only held in memory.
const RECORD_RETRIES: usize = 2;
const RECORD_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Certified receipts that reached neither the donation nor the side-log.
type UnsavedReceipts = Arc<Mutex<HashMap<Uuid, IssuedReceipt>>>;

/// Pipeline stage of an issuance attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssuanceStage {
    NotStarted,
    Building,
    Signing,
    Certifying,
    Persisting,
    Done,
}

impl IssuanceStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssuanceStage::NotStarted => "not_started",
            IssuanceStage::Building => "building",
            IssuanceStage::Signing => "signing",
            IssuanceStage::Certifying => "certifying",
            IssuanceStage::Persisting => "persisting",
            IssuanceStage::Done => "done",
        }
    }
}

impl fmt::Display for IssuanceStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of an issuance attempt.
#[derive(Debug, thiserror::Error)]
pub enum IssuanceError {
    #[error("donation {0} not found")]
    NotFound(Uuid),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{stage} failed: {source}")]
    Remote {
        stage: IssuanceStage,
        source: AuthorityError,
    },

    /// Certification succeeded but the receipt is not on the donation yet.
    /// The receipt is a real, certified document.
    #[error("receipt {} certified but not persisted: {message}", .receipt.document_uuid)]
    Persistence {
        receipt: IssuedReceipt,
        message: String,
        /// False when the donation is gone or carries another receipt.
        transient: bool,
    },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl IssuanceError {
    /// Stage at which the attempt failed.
    pub fn stage(&self) -> IssuanceStage {
        match self {
            IssuanceError::NotFound(_) | IssuanceError::Storage(_) => IssuanceStage::NotStarted,
            IssuanceError::Validation(_) => IssuanceStage::Building,
            IssuanceError::Remote { stage, .. } => *stage,
            IssuanceError::Persistence { .. } => IssuanceStage::Persisting,
        }
    }

    /// Identifiers of a receipt that was certified but not persisted.
    pub fn certified_receipt(&self) -> Option<&IssuedReceipt> {
        match self {
            IssuanceError::Persistence { receipt, .. } => Some(receipt),
            _ => None,
        }
    }

    /// Whether persisting again could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            IssuanceError::Persistence { transient, .. } => *transient,
            IssuanceError::Storage(_) => true,
            _ => false,
        }
    }

    pub fn remote_kind(&self) -> Option<RemoteErrorKind> {
        match self {
            IssuanceError::Remote { source, .. } => Some(source.kind()),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, IssuanceError>;

/// Issues certified receipts for donations.
pub struct ReceiptIssuer {
    donations: Arc<dyn DonationStore>,
    pending: Arc<dyn PendingReceiptLog>,
    client: CertificationClient,
    builder: DocumentBuilder,
    retry: RetryPolicy,
    locks: DonationLocks,
    unsaved: UnsavedReceipts,
}

impl ReceiptIssuer {
    pub fn new(
        donations: Arc<dyn DonationStore>,
        pending: Arc<dyn PendingReceiptLog>,
        client: CertificationClient,
        builder: DocumentBuilder,
    ) -> Self {
        Self {
            donations,
            pending,
            client,
            builder,
            retry: RetryPolicy::default(),
            locks: DonationLocks::new(),
            unsaved: UnsavedReceipts::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Share a lock registry with other mutators of the same donations.
    pub fn with_locks(mut self, locks: DonationLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn locks(&self) -> &DonationLocks {
        &self.locks
    }

    pub fn client(&self) -> &CertificationClient {
        &self.client
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Certified receipt for `donation_id` held in memory because neither
    /// the donation nor the side-log could be written.
    pub fn unsaved_receipt(&self, donation_id: Uuid) -> Option<IssuedReceipt> {
        self.unsaved
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&donation_id)
            .cloned()
    }

    /// Issue the receipt for `donation_id`, or return the one already issued.
    pub async fn issue(&self, donation_id: Uuid) -> Result<IssuedReceipt> {
        let lock = self.locks.acquire(donation_id).await;

        let donation = self
            .donations
            .load(donation_id)
            .await?
            .ok_or(IssuanceError::NotFound(donation_id))?;

        if let Some(receipt) = donation.receipt {
            debug!(donation_id = %donation_id, document_uuid = %receipt.document_uuid, "Receipt already issued");
            forget_unsaved(&self.unsaved, donation_id);
            return Ok(receipt);
        }

        if let Some(pending) = self.pending.get(donation_id).await? {
            warn!(
                donation_id = %donation_id,
                document_uuid = %pending.receipt.document_uuid,
                attempts = pending.attempts,
                "Certified receipt pending persistence, persisting without re-certifying"
            );
            return self.persist(lock, pending.receipt, true).await;
        }

        if let Some(receipt) = self.unsaved_receipt(donation_id) {
            warn!(
                donation_id = %donation_id,
                document_uuid = %receipt.document_uuid,
                "Certified receipt held in memory, persisting without re-certifying"
            );
            return self.persist(lock, receipt, false).await;
        }

        if let Err(e) = guard::check_issuable(&donation) {
            warn!(donation_id = %donation_id, field = e.field, "Donation not issuable");
            return Err(e.into());
        }

        let receipt = self.certify(&donation).await?;
        self.persist(lock, receipt, false).await
    }

    async fn certify(&self, donation: &Donation) -> Result<IssuedReceipt> {
        let donation_id = donation.id;

        debug!(donation_id = %donation_id, stage = %IssuanceStage::Building, "Building document");
        let document = self.builder.build(donation).map_err(|e| {
            warn!(donation_id = %donation_id, stage = %IssuanceStage::Building, error = %e, "Document build failed");
            e
        })?;

        debug!(donation_id = %donation_id, stage = %IssuanceStage::Signing, request_id = %document.request_id, "Signing document");
        let signed = self
            .retry
            .run(IssuanceStage::Signing.as_str(), || self.client.sign(&document))
            .await
            .map_err(|e| remote_failure(donation_id, IssuanceStage::Signing, e))?;

        debug!(donation_id = %donation_id, stage = %IssuanceStage::Certifying, "Certifying document");
        let certified = self
            .retry
            .run(IssuanceStage::Certifying.as_str(), || self.client.certify(&signed))
            .await
            .map_err(|e| remote_failure(donation_id, IssuanceStage::Certifying, e))?;

        info!(
            donation_id = %donation_id,
            series = %certified.series,
            number = %certified.number,
            document_uuid = %certified.uuid,
            "Receipt certified"
        );

        Ok(IssuedReceipt {
            series: certified.series,
            number: certified.number,
            document_uuid: certified.uuid,
            document_url: certified.url,
            issued_at: certified.certified_at,
        })
    }

    /// Persist on a task of its own that also owns the donation lock.
    async fn persist(
        &self,
        lock: DonationLockGuard,
        receipt: IssuedReceipt,
        already_recorded: bool,
    ) -> Result<IssuedReceipt> {
        let donations = self.donations.clone();
        let pending = self.pending.clone();
        let unsaved = self.unsaved.clone();
        let donation_id = lock.donation_id();
        let fallback = receipt.clone();

        // Keep the receipt reachable until the task has an outcome.
        hold_unsaved(&self.unsaved, donation_id, &receipt);

        let task = tokio::spawn(async move {
            let _lock = lock;
            let result = persist_certified(
                donations.as_ref(),
                pending.as_ref(),
                donation_id,
                receipt,
                already_recorded,
            )
            .await;
            if result.is_ok() {
                forget_unsaved(&unsaved, donation_id);
            }
            result
        });

        match task.await {
            Ok(result) => result,
            Err(e) => {
                log_unpersisted(donation_id, &fallback, &e.to_string());
                Err(IssuanceError::Persistence {
                    receipt: fallback,
                    message: format!("persistence task failed: {}", e),
                    transient: true,
                })
            }
        }
    }
}

fn hold_unsaved(unsaved: &UnsavedReceipts, donation_id: Uuid, receipt: &IssuedReceipt) {
    unsaved
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .insert(donation_id, receipt.clone());
}

fn forget_unsaved(unsaved: &UnsavedReceipts, donation_id: Uuid) {
    unsaved
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .remove(&donation_id);
}

fn remote_failure(donation_id: Uuid, stage: IssuanceStage, source: AuthorityError) -> IssuanceError {
    match source.kind() {
        RemoteErrorKind::Rejected => {
            error!(donation_id = %donation_id, stage = %stage, error = %source, "Authority rejected document")
        }
        kind => {
            warn!(donation_id = %donation_id, stage = %stage, kind = %kind, error = %source, "Authority call failed")
        }
    }
    IssuanceError::Remote { stage, source }
}

fn log_unpersisted(donation_id: Uuid, receipt: &IssuedReceipt, reason: &str) {
    error!(
        donation_id = %donation_id,
        series = %receipt.series,
        number = %receipt.number,
        document_uuid = %receipt.document_uuid,
        document_url = %receipt.document_url,
        issued_at = %receipt.issued_at,
        error = %reason,
        "Certified receipt NOT persisted"
    );
}

/// Write a certified receipt onto its donation through the side-log.
///
/// Record in the side-log, set the receipt fields, clear the side-log entry.
/// A receipt already stored with the same document UUID counts as persisted.
/// On failure the side-log entry stays for reconciliation.
pub(crate) async fn persist_certified(
    donations: &dyn DonationStore,
    pending: &dyn PendingReceiptLog,
    donation_id: Uuid,
    receipt: IssuedReceipt,
    already_recorded: bool,
) -> Result<IssuedReceipt> {
    debug!(donation_id = %donation_id, stage = %IssuanceStage::Persisting, "Persisting receipt");

    if !already_recorded {
        let entry = PendingReceipt::new(donation_id, receipt.clone());
        let recorded = (|| pending.record(&entry))
            .retry(
                ConstantBuilder::default()
                    .with_delay(RECORD_RETRY_DELAY)
                    .with_max_times(RECORD_RETRIES),
            )
            .notify(|err: &StorageError, _| {
                warn!(donation_id = %donation_id, error = %err, "Side-log write failed, retrying");
            })
            .await;
        if let Err(e) = recorded {
            // Still attempt the donation update; the issuer keeps the receipt in memory.
            error!(donation_id = %donation_id, document_uuid = %receipt.document_uuid, error = %e, "Failed to record certified receipt in side-log");
        }
    }

    match donations.persist_receipt(donation_id, &receipt).await {
        Ok(()) => {}
        Err(StorageError::ReceiptAlreadyIssued { existing, .. })
            if existing.document_uuid == receipt.document_uuid =>
        {
            debug!(donation_id = %donation_id, "Receipt was already persisted");
        }
        Err(e) => {
            let transient = !matches!(
                e,
                StorageError::ReceiptAlreadyIssued { .. } | StorageError::NotFound(_)
            );
            let message = match &e {
                StorageError::ReceiptAlreadyIssued { existing, .. } => format!(
                    "donation already carries a different receipt {}",
                    existing.document_uuid
                ),
                other => other.to_string(),
            };
            log_unpersisted(donation_id, &receipt, &message);
            if already_recorded {
                if let Err(e) = pending.mark_attempt(donation_id).await {
                    warn!(donation_id = %donation_id, error = %e, "Failed to count persistence attempt");
                }
            }
            return Err(IssuanceError::Persistence {
                receipt,
                message,
                transient,
            });
        }
    }

    if let Err(e) = pending.remove(donation_id).await {
        warn!(donation_id = %donation_id, error = %e, "Receipt persisted but side-log entry not cleared");
    }

    info!(
        donation_id = %donation_id,
        stage = %IssuanceStage::Done,
        series = %receipt.series,
        number = %receipt.number,
        document_uuid = %receipt.document_uuid,
        "Receipt issued"
    );
    Ok(receipt)
}
