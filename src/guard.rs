//! Donation state guard.
//!
//! Checks run at the boundary before any mutation of a donation. None of them
//! touch the network or the store; callers load the donation first and hold
//! the per-donation lock while checking and mutating.

use uuid::Uuid;

use crate::domain::{fields, Donation, DonationUpdate, ValidationError};

/// A mutation refused because the donation already carries a receipt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GuardError {
    #[error("donation {donation_id} has an issued receipt and cannot be deleted")]
    ReceiptIssued { donation_id: Uuid },

    #[error("field '{field}' of donation {donation_id} is fixed by its issued receipt")]
    ImmutableField {
        donation_id: Uuid,
        field: &'static str,
    },
}

/// Deletion is only allowed while no receipt has been issued.
pub fn check_delete(donation: &Donation) -> Result<(), GuardError> {
    if donation.receipt_issued() {
        return Err(GuardError::ReceiptIssued {
            donation_id: donation.id,
        });
    }
    Ok(())
}

/// Fields printed on the receipt are frozen once it is issued. Notes stay
/// editable.
pub fn check_update(donation: &Donation, update: &DonationUpdate) -> Result<(), GuardError> {
    if !donation.receipt_issued() {
        return Ok(());
    }
    match update.receipt_bound_fields().into_iter().next() {
        Some(field) => Err(GuardError::ImmutableField {
            donation_id: donation.id,
            field,
        }),
        None => Ok(()),
    }
}

/// Donor data the authority requires before any remote call is made.
pub fn check_issuable(donation: &Donation) -> Result<(), ValidationError> {
    if is_blank(donation.donor.tax_id.as_deref()) {
        return Err(ValidationError::missing(fields::DONOR_TAX_ID));
    }
    if is_blank(donation.donor.address.as_deref()) {
        return Err(ValidationError::missing(fields::DONOR_ADDRESS));
    }
    Ok(())
}

fn is_blank(value: Option<&str>) -> bool {
    value.map(|v| v.trim().is_empty()).unwrap_or(true)
}
