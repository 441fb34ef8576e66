use dashmap::DashMap;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

type LockMap = DashMap<Uuid, Arc<Mutex<()>>>;

/// Per-user exclusion for feed merges.
///
/// Entries are created on demand and removed once the last holder or waiter
/// is gone, so the map only ever contains users with a merge in flight.
#[derive(Clone, Default)]
pub struct UserLocks {
    inner: Arc<LockMap>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `user_id`.
    ///
    /// Dropping the returned future before it resolves releases the waiter's
    /// share of the entry just like dropping a guard does.
    pub async fn lock(&self, user_id: Uuid) -> UserLockGuard {
        let mutex = self
            .inner
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let mut pending = PendingLock {
            acquire: Box::pin(mutex.lock_owned()),
            cleanup: EntryCleanup {
                user_id,
                locks: Arc::clone(&self.inner),
            },
        };
        let guard = pending.acquire.as_mut().await;

        UserLockGuard {
            _guard: guard,
            _cleanup: pending.cleanup,
        }
    }

    /// Number of users with a lock held or awaited.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Drops the user's entry once nobody else references its mutex.
///
/// Always declared after the field that holds the mutex, so that reference
/// is already gone when this runs.
struct EntryCleanup {
    user_id: Uuid,
    locks: Arc<LockMap>,
}

impl Drop for EntryCleanup {
    fn drop(&mut self) {
        self.locks
            .remove_if(&self.user_id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

struct PendingLock<F> {
    acquire: Pin<Box<F>>,
    cleanup: EntryCleanup,
}

pub struct UserLockGuard {
    _guard: OwnedMutexGuard<()>,
    _cleanup: EntryCleanup,
}
