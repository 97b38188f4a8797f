//! PendingReceiptLog interface tests.

use chrono::{Duration, Utc};
use uuid::Uuid;

use carehome_receipts::storage::{PendingReceipt, PendingReceiptLog};

use super::donation_store_tests::make_receipt;

pub async fn test_get_nonexistent<S: PendingReceiptLog + ?Sized>(log: &S) {
    let entry = log.get(Uuid::new_v4()).await.expect("get should succeed");
    assert!(entry.is_none());
}

pub async fn test_record_and_get<S: PendingReceiptLog + ?Sized>(log: &S) {
    let entry = PendingReceipt::new(Uuid::new_v4(), make_receipt("P1"));
    log.record(&entry).await.expect("record should succeed");

    let stored = log
        .get(entry.donation_id)
        .await
        .expect("get should succeed")
        .expect("entry should exist");
    assert_eq!(stored.receipt, entry.receipt);
    assert_eq!(stored.attempts, 0);

    log.remove(entry.donation_id).await.unwrap();
}

pub async fn test_record_again_counts_attempt<S: PendingReceiptLog + ?Sized>(log: &S) {
    let entry = PendingReceipt::new(Uuid::new_v4(), make_receipt("P2"));
    log.record(&entry).await.unwrap();
    log.record(&entry).await.unwrap();

    let stored = log.get(entry.donation_id).await.unwrap().unwrap();
    assert_eq!(stored.attempts, 1);
    assert_eq!(stored.receipt, entry.receipt);

    log.remove(entry.donation_id).await.unwrap();
}

pub async fn test_mark_attempt<S: PendingReceiptLog + ?Sized>(log: &S) {
    let entry = PendingReceipt::new(Uuid::new_v4(), make_receipt("P3"));
    log.record(&entry).await.unwrap();

    log.mark_attempt(entry.donation_id).await.unwrap();
    log.mark_attempt(entry.donation_id).await.unwrap();

    let stored = log.get(entry.donation_id).await.unwrap().unwrap();
    assert_eq!(stored.attempts, 2);

    // Unknown entries are ignored.
    log.mark_attempt(Uuid::new_v4()).await.unwrap();

    log.remove(entry.donation_id).await.unwrap();
}

pub async fn test_list_oldest_first<S: PendingReceiptLog + ?Sized>(log: &S) {
    let now = Utc::now();
    let mut newer = PendingReceipt::new(Uuid::new_v4(), make_receipt("P4"));
    newer.recorded_at = now;
    let mut older = PendingReceipt::new(Uuid::new_v4(), make_receipt("P5"));
    older.recorded_at = now - Duration::minutes(5);

    log.record(&newer).await.unwrap();
    log.record(&older).await.unwrap();

    let ids: Vec<Uuid> = log
        .list()
        .await
        .expect("list should succeed")
        .into_iter()
        .map(|p| p.donation_id)
        .collect();
    assert_eq!(ids, vec![older.donation_id, newer.donation_id]);

    log.remove(older.donation_id).await.unwrap();
    log.remove(newer.donation_id).await.unwrap();
}

pub async fn test_remove<S: PendingReceiptLog + ?Sized>(log: &S) {
    let entry = PendingReceipt::new(Uuid::new_v4(), make_receipt("P6"));
    log.record(&entry).await.unwrap();

    log.remove(entry.donation_id).await.expect("remove should succeed");
    assert!(log.get(entry.donation_id).await.unwrap().is_none());

    // Removing twice is a no-op.
    log.remove(entry.donation_id).await.expect("remove is idempotent");
}

/// Run all PendingReceiptLog tests against a log implementation.
///
/// Tests clean up after themselves so `list` sees only its own entries.
#[macro_export]
macro_rules! run_pending_receipt_tests {
    ($log:expr) => {
        use $crate::storage::pending_receipt_tests::*;

        test_get_nonexistent($log).await;
        println!("  test_get_nonexistent: PASSED");

        test_record_and_get($log).await;
        println!("  test_record_and_get: PASSED");

        test_record_again_counts_attempt($log).await;
        println!("  test_record_again_counts_attempt: PASSED");

        test_mark_attempt($log).await;
        println!("  test_mark_attempt: PASSED");

        test_list_oldest_first($log).await;
        println!("  test_list_oldest_first: PASSED");

        test_remove($log).await;
        println!("  test_remove: PASSED");
    };
}
