//! SQLite implementations of storage interfaces.

mod donation_store;
mod pending_receipts;

pub use donation_store::SqliteDonationStore;
pub use pending_receipts::SqlitePendingReceiptLog;

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::storage::{Result, StorageError};

fn parse_uuid(column: &str, value: &str) -> Result<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| StorageError::Corrupt(format!("{}: invalid uuid '{}': {}", column, value, e)))
}

fn parse_timestamp(column: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            StorageError::Corrupt(format!("{}: invalid timestamp '{}': {}", column, value, e))
        })
}

fn parse_decimal(column: &str, value: Option<String>) -> Result<Option<Decimal>> {
    value
        .map(|v| {
            Decimal::from_str(&v).map_err(|e| {
                StorageError::Corrupt(format!("{}: invalid decimal '{}': {}", column, v, e))
            })
        })
        .transpose()
}
