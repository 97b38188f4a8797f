//! Mock PendingReceiptLog implementation for testing.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::storage::{PendingReceipt, PendingReceiptLog, Result, StorageError};

/// Mock pending-receipt log that keeps entries in memory.
#[derive(Default)]
pub struct MockPendingReceiptLog {
    entries: RwLock<HashMap<Uuid, PendingReceipt>>,
    fail_on_record: RwLock<bool>,
    fail_on_remove: RwLock<bool>,
}

impl MockPendingReceiptLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_record(&self, fail: bool) {
        *self.fail_on_record.write().await = fail;
    }

    pub async fn set_fail_on_remove(&self, fail: bool) {
        *self.fail_on_remove.write().await = fail;
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl PendingReceiptLog for MockPendingReceiptLog {
    async fn record(&self, pending: &PendingReceipt) -> Result<()> {
        if *self.fail_on_record.read().await {
            return Err(StorageError::Unavailable("mock record failure".to_string()));
        }
        self.entries
            .write()
            .await
            .entry(pending.donation_id)
            .and_modify(|existing| existing.attempts += 1)
            .or_insert_with(|| pending.clone());
        Ok(())
    }

    async fn get(&self, donation_id: Uuid) -> Result<Option<PendingReceipt>> {
        Ok(self.entries.read().await.get(&donation_id).cloned())
    }

    async fn list(&self) -> Result<Vec<PendingReceipt>> {
        let mut entries: Vec<_> = self.entries.read().await.values().cloned().collect();
        entries.sort_by_key(|p| p.recorded_at);
        Ok(entries)
    }

    async fn mark_attempt(&self, donation_id: Uuid) -> Result<()> {
        if let Some(entry) = self.entries.write().await.get_mut(&donation_id) {
            entry.attempts += 1;
        }
        Ok(())
    }

    async fn remove(&self, donation_id: Uuid) -> Result<()> {
        if *self.fail_on_remove.read().await {
            return Err(StorageError::Unavailable("mock remove failure".to_string()));
        }
        self.entries.write().await.remove(&donation_id);
        Ok(())
    }
}
