//! Per-donation mutual exclusion.
//!
//! One async mutex per donation id, created on demand and dropped once the
//! last holder or waiter is gone. Entries for different donations never
//! contend.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

/// A donation's mutex and the number of holders plus waiters on it.
struct Slot {
    mutex: Arc<AsyncMutex<()>>,
    users: usize,
}

type LockMap = HashMap<Uuid, Slot>;

/// Registry of per-donation locks.
#[derive(Clone, Default)]
pub struct DonationLocks {
    inner: Arc<Mutex<LockMap>>,
}

impl DonationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `donation_id`.
    ///
    /// The returned guard is `'static` so it can be moved into a spawned task.
    /// Dropping the future while it waits releases the registration as well.
    pub async fn acquire(&self, donation_id: Uuid) -> DonationLockGuard {
        let (registration, mutex) = self.register(donation_id);
        let guard = mutex.lock_owned().await;

        DonationLockGuard {
            guard,
            registration,
        }
    }

    fn register(&self, donation_id: Uuid) -> (Registration, Arc<AsyncMutex<()>>) {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let slot = map.entry(donation_id).or_insert_with(|| Slot {
            mutex: Arc::default(),
            users: 0,
        });
        slot.users += 1;

        let registration = Registration {
            donation_id,
            locks: self.clone(),
        };
        (registration, slot.mutex.clone())
    }

    /// Number of donations with a live lock entry.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One holder's or waiter's claim on a map entry. The last one out removes it.
struct Registration {
    donation_id: Uuid,
    locks: DonationLocks,
}

impl Drop for Registration {
    fn drop(&mut self) {
        let mut map = self.locks.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Entry::Occupied(mut slot) = map.entry(self.donation_id) {
            slot.get_mut().users = slot.get().users.saturating_sub(1);
            if slot.get().users == 0 {
                slot.remove();
            }
        }
    }
}

/// Exclusive access to one donation. Released on drop.
pub struct DonationLockGuard {
    // Field order matters: the mutex is released before the registration.
    guard: OwnedMutexGuard<()>,
    registration: Registration,
}

impl DonationLockGuard {
    pub fn donation_id(&self) -> Uuid {
        self.registration.donation_id
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_entry_removed_after_release() {
        let locks = DonationLocks::new();
        let id = Uuid::new_v4();

        let guard = locks.acquire(id).await;
        assert_eq!(guard.donation_id(), id);
        assert_eq!(locks.len(), 1);

        drop(guard);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_same_donation_serialized() {
        let locks = DonationLocks::new();
        let id = Uuid::new_v4();
        let inside = Arc::new(AtomicU32::new(0));
        let max_inside = Arc::new(AtomicU32::new(0));

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let locks = locks.clone();
                let inside = inside.clone();
                let max_inside = max_inside.clone();
                tokio::spawn(async move {
                    let _guard = locks.acquire(id).await;
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_inside.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_different_donations_independent() {
        let locks = DonationLocks::new();
        let _first = locks.acquire(Uuid::new_v4()).await;

        let second = tokio::time::timeout(
            Duration::from_millis(100),
            locks.acquire(Uuid::new_v4()),
        )
        .await;
        assert!(second.is_ok());
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_leaves_no_entry() {
        let locks = DonationLocks::new();
        let id = Uuid::new_v4();
        let holder = locks.acquire(id).await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire(id).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(locks.len(), 1);

        drop(holder);
        waiter.abort();
        let _ = waiter.await;

        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_timed_out_acquire_leaves_no_entry() {
        let locks = DonationLocks::new();
        let id = Uuid::new_v4();
        let holder = locks.acquire(id).await;

        let attempt = tokio::time::timeout(Duration::from_millis(20), locks.acquire(id)).await;
        assert!(attempt.is_err());
        assert_eq!(locks.len(), 1);

        drop(holder);
        assert!(locks.is_empty());

        // The donation can still be locked afterwards.
        let again = locks.acquire(id).await;
        assert_eq!(again.donation_id(), id);
    }
}
