//! Storage and reconciliation configuration types.

use std::time::Duration;

use serde::Deserialize;

/// SQLite storage configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file path. Parent directories are created on startup.
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: "data/receipts.db".to_string(),
        }
    }
}

impl StorageConfig {
    /// Connection string for `sqlx`, creating the file if missing.
    pub fn connection_url(&self) -> String {
        format!("sqlite:{}?mode=rwc", self.path)
    }
}

/// Reconciler configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Seconds between reconciliation passes.
    pub interval_secs: u64,
    /// Persistence attempts per pending receipt and pass.
    pub max_attempts: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            max_attempts: 3,
        }
    }
}

impl ReconcilerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}
