//! Shared storage integration tests.
//!
//! Tests the DonationStore and PendingReceiptLog interfaces against all
//! implementations. Each implementation module runs these through the macros.

pub mod donation_store_tests;
pub mod pending_receipt_tests;
