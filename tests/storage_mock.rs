//! In-memory storage contract tests.
//!
//! The mocks back every unit test of the pipeline, so they must honour the
//! same contract as the SQLite stores.

mod storage;

use carehome_receipts::storage::{MockDonationStore, MockPendingReceiptLog};

#[tokio::test]
async fn test_mock_donation_store() {
    println!("=== Mock DonationStore Tests ===");
    let store = MockDonationStore::new();
    run_donation_store_tests!(&store);
    println!("=== All Mock DonationStore tests PASSED ===");
}

#[tokio::test]
async fn test_mock_pending_receipt_log() {
    println!("=== Mock PendingReceiptLog Tests ===");
    let log = MockPendingReceiptLog::new();
    run_pending_receipt_tests!(&log);
    println!("=== All Mock PendingReceiptLog tests PASSED ===");
}
