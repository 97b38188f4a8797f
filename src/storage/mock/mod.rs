//! Mock storage implementations for testing.

mod donation_store;
mod pending_receipts;

pub use donation_store::MockDonationStore;
pub use pending_receipts::MockPendingReceiptLog;
