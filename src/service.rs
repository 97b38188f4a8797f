//! Caller-facing receipt service.
//!
//! What the donation HTTP layer calls: issue, void and status of receipts,
//! plus guarded update and delete of donations. Donation mutations take the
//! same per-donation lock as issuance.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::authority::{AuthorityError, ReceiptStatus, RemoteErrorKind, VoidRequest, VoidResult};
use crate::domain::{fields, Donation, DonationUpdate, IssuedReceipt, ValidationError};
use crate::guard::{self, GuardError};
use crate::orchestration::{IssuanceError, IssuanceStage, ReceiptIssuer};
use crate::storage::{DonationStore, PendingReceiptLog, StorageError};

/// Coarse error classification exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    /// Refused by the donation state guard.
    Conflict,
    Auth,
    Timeout,
    Rejected,
    Unavailable,
    /// Certified but not persisted. The receipt exists.
    Persistence,
    Storage,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("donation {0} not found")]
    NotFound(Uuid),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Guard(#[from] GuardError),

    #[error(transparent)]
    Issuance(#[from] IssuanceError),

    #[error("authority call failed: {0}")]
    Remote(#[from] AuthorityError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::NotFound(_) => ErrorKind::NotFound,
            ServiceError::Validation(_) => ErrorKind::Validation,
            ServiceError::Guard(_) => ErrorKind::Conflict,
            ServiceError::Remote(e) => remote_kind(e.kind()),
            ServiceError::Storage(_) => ErrorKind::Storage,
            ServiceError::Issuance(e) => match e {
                IssuanceError::NotFound(_) => ErrorKind::NotFound,
                IssuanceError::Validation(_) => ErrorKind::Validation,
                IssuanceError::Remote { source, .. } => remote_kind(source.kind()),
                IssuanceError::Persistence { .. } => ErrorKind::Persistence,
                IssuanceError::Storage(_) => ErrorKind::Storage,
            },
        }
    }

    /// Offending field of a validation failure.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            ServiceError::Validation(e) | ServiceError::Issuance(IssuanceError::Validation(e)) => {
                Some(e.field)
            }
            ServiceError::Guard(GuardError::ImmutableField { field, .. }) => Some(field),
            _ => None,
        }
    }
}

fn remote_kind(kind: RemoteErrorKind) -> ErrorKind {
    match kind {
        RemoteErrorKind::Auth => ErrorKind::Auth,
        RemoteErrorKind::Timeout => ErrorKind::Timeout,
        RemoteErrorKind::Rejected => ErrorKind::Rejected,
        RemoteErrorKind::Unavailable => ErrorKind::Unavailable,
    }
}

/// Serialisable error for the HTTP layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBody {
    pub error_kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<IssuanceStage>,
    /// Present for persistence failures: the receipt was certified.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt: Option<IssuedReceipt>,
}

impl From<&ServiceError> for ErrorBody {
    fn from(err: &ServiceError) -> Self {
        let (stage, receipt) = match err {
            ServiceError::Issuance(e) => (Some(e.stage()), e.certified_receipt().cloned()),
            _ => (None, None),
        };
        Self {
            error_kind: err.kind(),
            message: err.to_string(),
            field: err.field(),
            stage,
            receipt,
        }
    }
}

/// Receipt state of a donation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ReceiptStatusView {
    NotIssued,
    /// Certified, awaiting reconciliation onto the donation.
    PendingPersistence { receipt: IssuedReceipt },
    Issued {
        receipt: IssuedReceipt,
        status: ReceiptStatus,
    },
}

pub type Result<T> = std::result::Result<T, ServiceError>;

/// Receipt operations on donations.
pub struct DonationReceiptService {
    issuer: Arc<ReceiptIssuer>,
    donations: Arc<dyn DonationStore>,
    pending: Arc<dyn PendingReceiptLog>,
}

impl DonationReceiptService {
    pub fn new(
        issuer: Arc<ReceiptIssuer>,
        donations: Arc<dyn DonationStore>,
        pending: Arc<dyn PendingReceiptLog>,
    ) -> Self {
        Self {
            issuer,
            donations,
            pending,
        }
    }

    pub fn issuer(&self) -> &Arc<ReceiptIssuer> {
        &self.issuer
    }

    pub async fn issue_receipt(&self, donation_id: Uuid) -> Result<IssuedReceipt> {
        Ok(self.issuer.issue(donation_id).await?)
    }

    /// Ask the authority to cancel a certified receipt.
    ///
    /// The donation keeps its receipt fields; voiding is recorded by the
    /// authority only.
    pub async fn void_receipt(&self, document_uuid: &str, reason: &str) -> Result<VoidResult> {
        let document_uuid = document_uuid.trim();
        if document_uuid.is_empty() {
            return Err(ValidationError::missing(fields::DOCUMENT_UUID).into());
        }
        if !document_uuid
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(ValidationError::invalid(
                fields::DOCUMENT_UUID,
                "only letters, digits and '-' allowed",
            )
            .into());
        }
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ValidationError::missing(fields::VOID_REASON).into());
        }

        let request = VoidRequest {
            reason: reason.to_string(),
            requested_at: Utc::now(),
        };
        let client = self.issuer.client();
        let result = self
            .issuer
            .retry_policy()
            .run("void", || client.void(document_uuid, &request))
            .await
            .map_err(|e| {
                warn!(document_uuid = %document_uuid, error = %e, "Void failed");
                e
            })?;

        info!(document_uuid = %result.uuid, voided_at = %result.voided_at, "Receipt voided");
        Ok(result)
    }

    pub async fn receipt_status(&self, donation_id: Uuid) -> Result<ReceiptStatusView> {
        let donation = self.load(donation_id).await?;

        if let Some(receipt) = donation.receipt {
            let client = self.issuer.client();
            let status = self
                .issuer
                .retry_policy()
                .run("status", || client.status(&receipt.document_uuid))
                .await?;
            return Ok(ReceiptStatusView::Issued { receipt, status });
        }

        match self.certified_unpersisted(donation_id).await? {
            Some(receipt) => Ok(ReceiptStatusView::PendingPersistence { receipt }),
            None => Ok(ReceiptStatusView::NotIssued),
        }
    }

    /// Apply `update` unless it touches fields frozen by a receipt.
    pub async fn update_donation(
        &self,
        donation_id: Uuid,
        update: &DonationUpdate,
    ) -> Result<Donation> {
        let _lock = self.issuer.locks().acquire(donation_id).await;
        let mut donation = self.load(donation_id).await?;

        guard::check_update(&donation, update)?;
        let bound = update.receipt_bound_fields();
        if let Some(&field) = bound.first() {
            // Certified already; the document must not diverge from the donation.
            if self.certified_unpersisted(donation_id).await?.is_some() {
                return Err(GuardError::ImmutableField { donation_id, field }.into());
            }
        }
        let freezes = !bound.is_empty();
        if update.is_empty() {
            return Ok(donation);
        }

        update.apply_to(&mut donation);
        self.donations
            .update_details(&donation, freezes)
            .await
            .map_err(|e| guard_conflict(e, donation_id))?;
        Ok(donation)
    }

    /// Delete a donation that has no receipt, issued or pending.
    pub async fn delete_donation(&self, donation_id: Uuid) -> Result<()> {
        let _lock = self.issuer.locks().acquire(donation_id).await;
        let donation = self.load(donation_id).await?;

        guard::check_delete(&donation)?;
        if self.certified_unpersisted(donation_id).await?.is_some() {
            return Err(GuardError::ReceiptIssued { donation_id }.into());
        }

        self.donations
            .delete(donation_id)
            .await
            .map_err(|e| guard_conflict(e, donation_id))?;
        info!(donation_id = %donation_id, "Donation deleted");
        Ok(())
    }

    /// Receipt certified for `donation_id` but not yet on the donation.
    async fn certified_unpersisted(&self, donation_id: Uuid) -> Result<Option<IssuedReceipt>> {
        if let Some(pending) = self.pending.get(donation_id).await? {
            return Ok(Some(pending.receipt));
        }
        Ok(self.issuer.unsaved_receipt(donation_id))
    }

    async fn load(&self, donation_id: Uuid) -> Result<Donation> {
        self.donations
            .load(donation_id)
            .await?
            .ok_or(ServiceError::NotFound(donation_id))
    }
}

/// The store's conditional write is the last line of the guard.
fn guard_conflict(err: StorageError, donation_id: Uuid) -> ServiceError {
    match err {
        StorageError::ReceiptAlreadyIssued { .. } => GuardError::ReceiptIssued { donation_id }.into(),
        StorageError::NotFound(id) => ServiceError::NotFound(id),
        other => other.into(),
    }
}
