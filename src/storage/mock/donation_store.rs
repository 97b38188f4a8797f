//! Mock DonationStore implementation for testing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::{Donation, IssuedReceipt};
use crate::storage::{DonationStore, Result, StorageError};

/// Mock donation store that keeps donations in memory.
#[derive(Default)]
pub struct MockDonationStore {
    donations: RwLock<HashMap<Uuid, Donation>>,
    fail_on_load: RwLock<bool>,
    fail_on_update: RwLock<bool>,
    fail_on_persist: RwLock<bool>,
    persist_delay: RwLock<Option<Duration>>,
    persist_calls: AtomicU32,
}

impl MockDonationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_load(&self, fail: bool) {
        *self.fail_on_load.write().await = fail;
    }

    pub async fn set_fail_on_update(&self, fail: bool) {
        *self.fail_on_update.write().await = fail;
    }

    pub async fn set_fail_on_persist(&self, fail: bool) {
        *self.fail_on_persist.write().await = fail;
    }

    /// Make `persist_receipt` sleep before touching the donation.
    pub async fn set_persist_delay(&self, delay: Option<Duration>) {
        *self.persist_delay.write().await = delay;
    }

    /// Calls to `persist_receipt`, including failed ones.
    pub fn persist_calls(&self) -> u32 {
        self.persist_calls.load(Ordering::SeqCst)
    }

    /// Stored copy of a donation, bypassing failure toggles.
    pub async fn snapshot(&self, id: Uuid) -> Option<Donation> {
        self.donations.read().await.get(&id).cloned()
    }

    fn already_issued(donation: &Donation) -> Option<StorageError> {
        donation
            .receipt
            .as_ref()
            .map(|existing| StorageError::ReceiptAlreadyIssued {
                donation_id: donation.id,
                existing: Box::new(existing.clone()),
            })
    }
}

#[async_trait]
impl DonationStore for MockDonationStore {
    async fn insert(&self, donation: &Donation) -> Result<()> {
        let mut donations = self.donations.write().await;
        if donations.contains_key(&donation.id) {
            return Err(StorageError::Unavailable(format!(
                "duplicate donation id {}",
                donation.id
            )));
        }
        donations.insert(donation.id, donation.clone());
        Ok(())
    }

    async fn load(&self, id: Uuid) -> Result<Option<Donation>> {
        if *self.fail_on_load.read().await {
            return Err(StorageError::Unavailable("mock load failure".to_string()));
        }
        Ok(self.donations.read().await.get(&id).cloned())
    }

    async fn update_details(&self, donation: &Donation, require_unissued: bool) -> Result<()> {
        if *self.fail_on_update.read().await {
            return Err(StorageError::Unavailable("mock update failure".to_string()));
        }
        let mut donations = self.donations.write().await;
        let stored = donations
            .get_mut(&donation.id)
            .ok_or(StorageError::NotFound(donation.id))?;
        if require_unissued {
            if let Some(err) = Self::already_issued(stored) {
                return Err(err);
            }
        }

        let receipt = stored.receipt.take();
        *stored = Donation {
            receipt,
            created_at: stored.created_at,
            ..donation.clone()
        };
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let mut donations = self.donations.write().await;
        let stored = donations.get(&id).ok_or(StorageError::NotFound(id))?;
        if let Some(err) = Self::already_issued(stored) {
            return Err(err);
        }
        donations.remove(&id);
        Ok(())
    }

    async fn persist_receipt(&self, id: Uuid, receipt: &IssuedReceipt) -> Result<()> {
        self.persist_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.persist_delay.read().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if *self.fail_on_persist.read().await {
            return Err(StorageError::Unavailable("mock persist failure".to_string()));
        }
        let mut donations = self.donations.write().await;
        let stored = donations.get_mut(&id).ok_or(StorageError::NotFound(id))?;
        if let Some(err) = Self::already_issued(stored) {
            return Err(err);
        }
        stored.receipt = Some(receipt.clone());
        stored.updated_at = Utc::now();
        Ok(())
    }
}
