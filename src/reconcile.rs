//! Reconciliation of certified-but-unpersisted receipts.
//!
//! Every entry in the pending-receipt log is a receipt the authority has
//! certified but that never reached its donation. The reconciler writes it
//! onto the donation, never contacting the authority.

use std::sync::Arc;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::ReconcilerConfig;
use crate::orchestration::{persist_certified, DonationLocks, IssuanceError};
use crate::storage::{DonationStore, PendingReceipt, PendingReceiptLog, StorageError};

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Entries found in the log.
    pub examined: usize,
    /// Entries written onto their donation (or found already written).
    pub persisted: usize,
    /// Entries still failing after all attempts. Kept for the next pass.
    pub failed: usize,
    /// Entries that cannot be applied: the donation is gone or carries a
    /// different receipt. Kept for an operator.
    pub conflicts: usize,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.conflicts == 0
    }
}

enum Outcome {
    Persisted,
    Failed,
    Conflict,
    /// Resolved by a concurrent issue call.
    Gone,
}

/// Drains the pending-receipt log.
pub struct ReceiptReconciler {
    donations: Arc<dyn DonationStore>,
    pending: Arc<dyn PendingReceiptLog>,
    locks: DonationLocks,
    max_attempts: usize,
}

impl ReceiptReconciler {
    /// `locks` must be the registry the issuer uses.
    pub fn new(
        donations: Arc<dyn DonationStore>,
        pending: Arc<dyn PendingReceiptLog>,
        locks: DonationLocks,
    ) -> Self {
        Self {
            donations,
            pending,
            locks,
            max_attempts: ReconcilerConfig::default().max_attempts,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_secs(5))
            .with_max_times(self.max_attempts.saturating_sub(1))
            .with_jitter()
    }

    /// Run one pass over the log.
    pub async fn reconcile_pending(&self) -> Result<ReconcileReport, StorageError> {
        let entries = self.pending.list().await?;
        let mut report = ReconcileReport {
            examined: entries.len(),
            ..Default::default()
        };

        if entries.is_empty() {
            debug!("No pending receipts");
            return Ok(report);
        }
        info!(count = entries.len(), "Reconciling pending receipts");

        for entry in entries {
            match self.reconcile_one(entry).await {
                Outcome::Persisted => report.persisted += 1,
                Outcome::Failed => report.failed += 1,
                Outcome::Conflict => report.conflicts += 1,
                Outcome::Gone => {}
            }
        }

        if report.is_clean() {
            info!(persisted = report.persisted, "Reconciliation pass complete");
        } else {
            warn!(
                persisted = report.persisted,
                failed = report.failed,
                conflicts = report.conflicts,
                "Reconciliation pass left pending receipts"
            );
        }
        Ok(report)
    }

    async fn reconcile_one(&self, entry: PendingReceipt) -> Outcome {
        let donation_id = entry.donation_id;
        let _lock = self.locks.acquire(donation_id).await;

        // Re-read under the lock; an issue call may have resolved it.
        let entry = match self.pending.get(donation_id).await {
            Ok(Some(current)) => current,
            Ok(None) => return Outcome::Gone,
            Err(e) => {
                warn!(donation_id = %donation_id, error = %e, "Failed to re-read pending receipt");
                return Outcome::Failed;
            }
        };
        let receipt = entry.receipt;

        match self.donations.load(donation_id).await {
            Ok(None) => {
                error!(
                    donation_id = %donation_id,
                    document_uuid = %receipt.document_uuid,
                    "Certified receipt belongs to a missing donation"
                );
                return Outcome::Conflict;
            }
            Ok(Some(donation)) => match donation.receipt {
                Some(existing) if existing.document_uuid == receipt.document_uuid => {
                    debug!(donation_id = %donation_id, "Receipt already on donation, clearing entry");
                    if let Err(e) = self.pending.remove(donation_id).await {
                        warn!(donation_id = %donation_id, error = %e, "Failed to clear pending receipt");
                        return Outcome::Failed;
                    }
                    return Outcome::Persisted;
                }
                Some(existing) => {
                    error!(
                        donation_id = %donation_id,
                        pending_uuid = %receipt.document_uuid,
                        existing_uuid = %existing.document_uuid,
                        "Donation carries a different receipt than the pending one"
                    );
                    return Outcome::Conflict;
                }
                None => {}
            },
            Err(e) => {
                warn!(donation_id = %donation_id, error = %e, "Failed to load donation");
                return Outcome::Failed;
            }
        }

        let result = (|| {
            persist_certified(
                self.donations.as_ref(),
                self.pending.as_ref(),
                donation_id,
                receipt.clone(),
                true,
            )
        })
        .retry(self.backoff())
        .when(IssuanceError::is_transient)
        .notify(|err: &IssuanceError, delay| {
            warn!(donation_id = %donation_id, error = %err, delay_ms = delay.as_millis() as u64, "Persistence failed, backing off");
        })
        .await;

        match result {
            Ok(_) => {
                info!(donation_id = %donation_id, document_uuid = %receipt.document_uuid, "Pending receipt reconciled");
                Outcome::Persisted
            }
            Err(_) => Outcome::Failed,
        }
    }
}

/// Handle to a running reconciler task.
pub struct ReconcilerHandle {
    cancel: tokio::sync::watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl ReconcilerHandle {
    /// Signal the reconciler task to stop.
    pub fn stop(&self) {
        let _ = self.cancel.send(true);
    }

    /// Stop the task and wait for the current pass to finish.
    pub async fn shutdown(self) {
        self.stop();
        if let Err(e) = self.task.await {
            warn!(error = %e, "Reconciler task ended abnormally");
        }
    }
}

/// Spawn a background task that reconciles the log every `interval`.
pub fn spawn_reconciler(reconciler: Arc<ReceiptReconciler>, interval: Duration) -> ReconcilerHandle {
    let (cancel_tx, mut cancel_rx) = tokio::sync::watch::channel(false);

    let task = tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "Receipt reconciler started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = reconciler.reconcile_pending().await {
                        error!(error = %e, "Reconciliation pass failed");
                    }
                }
                _ = cancel_rx.changed() => {
                    if *cancel_rx.borrow() {
                        info!("Receipt reconciler stopped");
                        break;
                    }
                }
            }
        }
    });

    ReconcilerHandle {
        cancel: cancel_tx,
        task,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    use super::*;
    use crate::domain::{Donation, DonationKind, Donor, IssuedReceipt};
    use crate::storage::{MockDonationStore, MockPendingReceiptLog};

    struct Fixture {
        donations: Arc<MockDonationStore>,
        pending: Arc<MockPendingReceiptLog>,
        reconciler: Arc<ReceiptReconciler>,
    }

    fn fixture() -> Fixture {
        let donations = Arc::new(MockDonationStore::new());
        let pending = Arc::new(MockPendingReceiptLog::new());
        let reconciler = ReceiptReconciler::new(
            donations.clone(),
            pending.clone(),
            DonationLocks::new(),
        )
        .with_max_attempts(2);
        Fixture {
            donations,
            pending,
            reconciler: Arc::new(reconciler),
        }
    }

    fn receipt(uuid: &str) -> IssuedReceipt {
        IssuedReceipt {
            series: "A".to_string(),
            number: "123".to_string(),
            document_uuid: uuid.to_string(),
            document_url: format!("https://authority.invalid/{}", uuid),
            issued_at: Utc::now(),
        }
    }

    async fn donation(f: &Fixture) -> Uuid {
        let donation = Donation::new(
            DonationKind::InKind,
            Donor {
                name: "Farmacia San José".to_string(),
                tax_id: Some("7654321".to_string()),
                address: Some("Zona 10".to_string()),
            },
        )
        .with_estimated_value(Decimal::new(120075, 2));
        f.donations.insert(&donation).await.unwrap();
        donation.id
    }

    #[tokio::test]
    async fn test_empty_log() {
        let f = fixture();
        let report = f.reconciler.reconcile_pending().await.unwrap();
        assert_eq!(report, ReconcileReport::default());
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn test_pending_receipt_persisted() {
        let f = fixture();
        let id = donation(&f).await;
        f.pending
            .record(&PendingReceipt::new(id, receipt("U-1")))
            .await
            .unwrap();

        let report = f.reconciler.reconcile_pending().await.unwrap();

        assert_eq!(report.examined, 1);
        assert_eq!(report.persisted, 1);
        assert!(f.pending.is_empty().await);
        let stored = f.donations.snapshot(id).await.unwrap();
        assert_eq!(stored.receipt.unwrap().document_uuid, "U-1");
    }

    #[tokio::test]
    async fn test_already_persisted_entry_cleared() {
        let f = fixture();
        let id = donation(&f).await;
        f.donations.persist_receipt(id, &receipt("U-1")).await.unwrap();
        f.pending
            .record(&PendingReceipt::new(id, receipt("U-1")))
            .await
            .unwrap();

        let report = f.reconciler.reconcile_pending().await.unwrap();

        assert_eq!(report.persisted, 1);
        assert!(f.pending.is_empty().await);
        assert_eq!(f.donations.persist_calls(), 1);
    }

    #[tokio::test]
    async fn test_conflicting_receipt_kept() {
        let f = fixture();
        let id = donation(&f).await;
        f.donations.persist_receipt(id, &receipt("U-1")).await.unwrap();
        f.pending
            .record(&PendingReceipt::new(id, receipt("U-2")))
            .await
            .unwrap();

        let report = f.reconciler.reconcile_pending().await.unwrap();

        assert_eq!(report.conflicts, 1);
        assert!(!report.is_clean());
        assert!(f.pending.get(id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_missing_donation_is_conflict() {
        let f = fixture();
        f.pending
            .record(&PendingReceipt::new(Uuid::new_v4(), receipt("U-9")))
            .await
            .unwrap();

        let report = f.reconciler.reconcile_pending().await.unwrap();
        assert_eq!(report.conflicts, 1);
        assert_eq!(f.pending.len().await, 1);
    }

    #[tokio::test]
    async fn test_persistent_failure_kept_for_next_pass() {
        let f = fixture();
        let id = donation(&f).await;
        f.pending
            .record(&PendingReceipt::new(id, receipt("U-1")))
            .await
            .unwrap();
        f.donations.set_fail_on_persist(true).await;

        let report = f.reconciler.reconcile_pending().await.unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(f.donations.persist_calls(), 2);
        assert_eq!(f.pending.get(id).await.unwrap().unwrap().attempts, 2);

        f.donations.set_fail_on_persist(false).await;
        let report = f.reconciler.reconcile_pending().await.unwrap();
        assert_eq!(report.persisted, 1);
        assert!(f.pending.is_empty().await);
    }

    #[tokio::test]
    async fn test_spawned_reconciler_drains_log() {
        let f = fixture();
        let id = donation(&f).await;
        f.pending
            .record(&PendingReceipt::new(id, receipt("U-1")))
            .await
            .unwrap();

        let handle = spawn_reconciler(f.reconciler.clone(), Duration::from_millis(10));
        for _ in 0..50 {
            if f.pending.is_empty().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.shutdown().await;

        assert!(f.pending.is_empty().await);
        assert!(f.donations.snapshot(id).await.unwrap().receipt_issued());
    }
}
