//! DonationStore interface tests.
//!
//! These tests verify the contract of the DonationStore trait.
//! Each storage implementation should run these tests.

use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use carehome_receipts::domain::{Donation, DonationKind, Donor, IssuedReceipt};
use carehome_receipts::storage::{DonationStore, StorageError};

/// A monetary donation from a final consumer.
pub fn make_donation() -> Donation {
    Donation::new(
        DonationKind::Monetary,
        Donor {
            name: "María López".to_string(),
            tax_id: Some("CF".to_string()),
            address: Some("Ciudad".to_string()),
        },
    )
    .with_amount(Decimal::new(150075, 2))
    .with_notes("Colecta de fin de año")
}

pub fn make_receipt(tag: &str) -> IssuedReceipt {
    IssuedReceipt {
        series: format!("S{}", tag),
        number: "1001".to_string(),
        document_uuid: format!("{}-{}", tag, Uuid::new_v4()).to_uppercase(),
        document_url: format!("https://authority.invalid/documents/{}", tag),
        issued_at: Utc.with_ymd_and_hms(2026, 3, 14, 15, 9, 26).unwrap(),
    }
}

// =============================================================================
// insert / load
// =============================================================================

pub async fn test_load_nonexistent<S: DonationStore + ?Sized>(store: &S) {
    let loaded = store.load(Uuid::new_v4()).await.expect("load should succeed");
    assert!(loaded.is_none(), "nonexistent donation should be None");
}

pub async fn test_insert_and_load<S: DonationStore + ?Sized>(store: &S) {
    let donation = make_donation();
    store.insert(&donation).await.expect("insert should succeed");

    let loaded = store
        .load(donation.id)
        .await
        .expect("load should succeed")
        .expect("donation should exist");

    assert_eq!(loaded.kind, DonationKind::Monetary);
    assert_eq!(loaded.donor, donation.donor);
    assert_eq!(loaded.amount, Some(Decimal::new(150075, 2)));
    assert_eq!(loaded.estimated_value, None);
    assert_eq!(loaded.notes.as_deref(), Some("Colecta de fin de año"));
    assert!(!loaded.receipt_issued());
}

pub async fn test_insert_in_kind_donation<S: DonationStore + ?Sized>(store: &S) {
    let donation = Donation::new(
        DonationKind::InKind,
        Donor {
            name: "Supermercado La Económica".to_string(),
            tax_id: Some("4455667".to_string()),
            address: None,
        },
    )
    .with_estimated_value(Decimal::new(82050, 2))
    .with_description("20 cajas de leche");
    store.insert(&donation).await.expect("insert should succeed");

    let loaded = store.load(donation.id).await.unwrap().unwrap();
    assert_eq!(loaded.kind, DonationKind::InKind);
    assert_eq!(loaded.amount, None);
    assert_eq!(loaded.estimated_value, Some(Decimal::new(82050, 2)));
    assert_eq!(loaded.description.as_deref(), Some("20 cajas de leche"));
    assert_eq!(loaded.donor.address, None);
}

// =============================================================================
// persist_receipt
// =============================================================================

pub async fn test_persist_receipt<S: DonationStore + ?Sized>(store: &S) {
    let donation = make_donation();
    store.insert(&donation).await.unwrap();
    let receipt = make_receipt("A");

    store
        .persist_receipt(donation.id, &receipt)
        .await
        .expect("persist should succeed");

    let loaded = store.load(donation.id).await.unwrap().unwrap();
    assert!(loaded.receipt_issued());
    assert_eq!(loaded.receipt, Some(receipt));
}

pub async fn test_persist_receipt_twice_conflicts<S: DonationStore + ?Sized>(store: &S) {
    let donation = make_donation();
    store.insert(&donation).await.unwrap();
    let first = make_receipt("B");
    store.persist_receipt(donation.id, &first).await.unwrap();

    let err = store
        .persist_receipt(donation.id, &make_receipt("C"))
        .await
        .expect_err("second receipt must be refused");

    match err {
        StorageError::ReceiptAlreadyIssued { existing, .. } => assert_eq!(*existing, first),
        other => panic!("expected ReceiptAlreadyIssued, got {}", other),
    }
    let loaded = store.load(donation.id).await.unwrap().unwrap();
    assert_eq!(loaded.receipt, Some(first));
}

pub async fn test_persist_receipt_unknown_donation<S: DonationStore + ?Sized>(store: &S) {
    let err = store
        .persist_receipt(Uuid::new_v4(), &make_receipt("D"))
        .await
        .expect_err("unknown donation");
    assert!(matches!(err, StorageError::NotFound(_)));
}

// =============================================================================
// update_details / delete
// =============================================================================

pub async fn test_update_unissued<S: DonationStore + ?Sized>(store: &S) {
    let mut donation = make_donation();
    store.insert(&donation).await.unwrap();

    donation.donor.tax_id = Some("7654321".to_string());
    donation.amount = Some(Decimal::new(200, 0));
    store
        .update_details(&donation, true)
        .await
        .expect("update should succeed");

    let loaded = store.load(donation.id).await.unwrap().unwrap();
    assert_eq!(loaded.donor.tax_id.as_deref(), Some("7654321"));
    assert_eq!(loaded.amount, Some(Decimal::new(200, 0)));
}

pub async fn test_update_issued_refused<S: DonationStore + ?Sized>(store: &S) {
    let mut donation = make_donation();
    store.insert(&donation).await.unwrap();
    let receipt = make_receipt("E");
    store.persist_receipt(donation.id, &receipt).await.unwrap();

    donation.amount = Some(Decimal::new(1, 0));
    let err = store
        .update_details(&donation, true)
        .await
        .expect_err("issued donation is frozen");
    assert!(matches!(err, StorageError::ReceiptAlreadyIssued { .. }));

    let loaded = store.load(donation.id).await.unwrap().unwrap();
    assert_eq!(loaded.amount, Some(Decimal::new(150075, 2)));
}

pub async fn test_update_notes_keeps_receipt<S: DonationStore + ?Sized>(store: &S) {
    let donation = make_donation();
    store.insert(&donation).await.unwrap();
    let receipt = make_receipt("F");
    store.persist_receipt(donation.id, &receipt).await.unwrap();

    let mut edited = store.load(donation.id).await.unwrap().unwrap();
    edited.notes = Some("Agradecimiento enviado".to_string());
    store
        .update_details(&edited, false)
        .await
        .expect("notes stay editable");

    let loaded = store.load(donation.id).await.unwrap().unwrap();
    assert_eq!(loaded.notes.as_deref(), Some("Agradecimiento enviado"));
    assert_eq!(loaded.receipt, Some(receipt));
}

pub async fn test_delete_unissued<S: DonationStore + ?Sized>(store: &S) {
    let donation = make_donation();
    store.insert(&donation).await.unwrap();

    store.delete(donation.id).await.expect("delete should succeed");
    assert!(store.load(donation.id).await.unwrap().is_none());
}

pub async fn test_delete_issued_refused<S: DonationStore + ?Sized>(store: &S) {
    let donation = make_donation();
    store.insert(&donation).await.unwrap();
    store
        .persist_receipt(donation.id, &make_receipt("G"))
        .await
        .unwrap();

    let err = store.delete(donation.id).await.expect_err("issued donation is kept");
    assert!(matches!(err, StorageError::ReceiptAlreadyIssued { .. }));
    assert!(store.load(donation.id).await.unwrap().is_some());
}

pub async fn test_delete_nonexistent<S: DonationStore + ?Sized>(store: &S) {
    let err = store.delete(Uuid::new_v4()).await.expect_err("unknown donation");
    assert!(matches!(err, StorageError::NotFound(_)));
}

/// Run all DonationStore tests against a store implementation.
#[macro_export]
macro_rules! run_donation_store_tests {
    ($store:expr) => {
        use $crate::storage::donation_store_tests::*;

        test_load_nonexistent($store).await;
        println!("  test_load_nonexistent: PASSED");

        test_insert_and_load($store).await;
        println!("  test_insert_and_load: PASSED");

        test_insert_in_kind_donation($store).await;
        println!("  test_insert_in_kind_donation: PASSED");

        test_persist_receipt($store).await;
        println!("  test_persist_receipt: PASSED");

        test_persist_receipt_twice_conflicts($store).await;
        println!("  test_persist_receipt_twice_conflicts: PASSED");

        test_persist_receipt_unknown_donation($store).await;
        println!("  test_persist_receipt_unknown_donation: PASSED");

        test_update_unissued($store).await;
        println!("  test_update_unissued: PASSED");

        test_update_issued_refused($store).await;
        println!("  test_update_issued_refused: PASSED");

        test_update_notes_keeps_receipt($store).await;
        println!("  test_update_notes_keeps_receipt: PASSED");

        test_delete_unissued($store).await;
        println!("  test_delete_unissued: PASSED");

        test_delete_issued_refused($store).await;
        println!("  test_delete_issued_refused: PASSED");

        test_delete_nonexistent($store).await;
        println!("  test_delete_nonexistent: PASSED");
    };
}
