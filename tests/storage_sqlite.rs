//! SQLite storage integration tests.
//!
//! Run with: cargo test --test storage_sqlite --features sqlite
//!
//! Uses in-memory database by default, no external dependencies required.

mod storage;

use std::sync::Arc;

use sqlx::sqlite::SqlitePoolOptions;
use uuid::Uuid;

use carehome_receipts::config::StorageConfig;
use carehome_receipts::storage::{
    init_storage, DonationStore, SqliteDonationStore, SqlitePendingReceiptLog, StorageError,
};

/// Get SQLite connection string (in-memory for tests)
fn sqlite_uri() -> String {
    std::env::var("SQLITE_URI").unwrap_or_else(|_| "sqlite::memory:".to_string())
}

/// A single connection, so every query sees the same in-memory database.
async fn connect() -> sqlx::SqlitePool {
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect(&sqlite_uri())
        .await
        .expect("Failed to connect to SQLite")
}

#[tokio::test]
async fn test_sqlite_donation_store() {
    println!("=== SQLite DonationStore Tests ===");
    println!("Connecting to: {}", sqlite_uri());

    let pool = connect().await;
    let store = SqliteDonationStore::new(pool);
    store.init().await.expect("Failed to create schema");

    run_donation_store_tests!(&store);

    println!("=== All SQLite DonationStore tests PASSED ===");
}

#[tokio::test]
async fn test_sqlite_pending_receipt_log() {
    println!("=== SQLite PendingReceiptLog Tests ===");

    let pool = connect().await;
    let log = SqlitePendingReceiptLog::new(pool);
    log.init().await.expect("Failed to create schema");

    run_pending_receipt_tests!(&log);

    println!("=== All SQLite PendingReceiptLog tests PASSED ===");
}

#[tokio::test]
async fn test_init_is_idempotent() {
    let pool = connect().await;
    let store = SqliteDonationStore::new(pool.clone());
    store.init().await.unwrap();
    store.init().await.unwrap();

    let log = SqlitePendingReceiptLog::new(pool);
    log.init().await.unwrap();
    log.init().await.unwrap();
}

#[tokio::test]
async fn test_corrupt_row_is_reported() {
    let pool = connect().await;
    let store = SqliteDonationStore::new(pool.clone());
    store.init().await.unwrap();

    let donation = storage::donation_store_tests::make_donation();
    store.insert(&donation).await.unwrap();
    sqlx::query("UPDATE donations SET amount = 'mil quetzales' WHERE id = ?")
        .bind(donation.id.to_string())
        .execute(&pool)
        .await
        .unwrap();

    let err = store.load(donation.id).await.expect_err("corrupt amount");
    assert!(matches!(err, StorageError::Corrupt(_)), "got {}", err);
}

#[tokio::test]
async fn test_partial_receipt_rejected_by_schema() {
    let pool = connect().await;
    let store = SqliteDonationStore::new(pool.clone());
    store.init().await.unwrap();

    let donation = storage::donation_store_tests::make_donation();
    store.insert(&donation).await.unwrap();

    let result = sqlx::query("UPDATE donations SET receipt_issued = 1 WHERE id = ?")
        .bind(donation.id.to_string())
        .execute(&pool)
        .await;
    assert!(result.is_err(), "issued flag without receipt fields must fail");
}

#[tokio::test]
async fn test_update_details_from_spawned_task() {
    let pool = connect().await;
    let store = SqliteDonationStore::new(pool);
    store.init().await.unwrap();

    let mut donation = storage::donation_store_tests::make_donation();
    store.insert(&donation).await.unwrap();
    donation.notes = Some("Entregado en recepción".to_string());

    let store: Arc<dyn DonationStore> = Arc::new(store);
    let spawned = store.clone();
    let edited = donation.clone();
    tokio::spawn(async move { spawned.update_details(&edited, true).await })
        .await
        .unwrap()
        .expect("update from a worker task");

    let loaded = store.load(donation.id).await.unwrap().unwrap();
    assert_eq!(loaded.notes.as_deref(), Some("Entregado en recepción"));
}

#[tokio::test]
async fn test_init_storage_creates_database_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("receipts.db");
    let config = StorageConfig {
        path: path.to_string_lossy().to_string(),
    };

    let (donations, pending) = init_storage(&config).await.expect("storage should open");
    assert!(path.exists());

    let donation = storage::donation_store_tests::make_donation();
    donations.insert(&donation).await.unwrap();
    assert!(donations.load(donation.id).await.unwrap().is_some());
    assert!(pending.get(Uuid::new_v4()).await.unwrap().is_none());

    // Shared handles are usable across tasks.
    let donations: Arc<dyn DonationStore> = donations;
    let id = donation.id;
    tokio::spawn(async move { donations.load(id).await.unwrap() })
        .await
        .unwrap()
        .expect("donation visible from another task");
}
