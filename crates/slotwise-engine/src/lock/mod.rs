//! Per-slot mutual exclusion across process instances.
//!
//! The lock is **advisory**: its job is to reduce useless conflicts and
//! keep the engine's in-section recheck meaningful. The store's
//! confirmed-slot uniqueness rule is the real safety barrier, so the lock
//! deliberately favours liveness: acquisition is non-blocking (no
//! queueing, no fairness) and every lock carries a TTL after which it
//! self-releases regardless of holder liveness.
//!
//! Release is holder-scoped: each lease carries a unique token, and
//! release is a conditional compare-and-delete. A lock that TTL-expired
//! before release is a no-op on release; another process may already
//! hold it.

pub mod memory;
pub mod redis;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use slotwise_core::{Error, SlotId};

pub use self::memory::MemoryLocker;
pub use self::redis::RedisLocker;

/// Key under which a slot's lock lives in the lock store.
#[must_use]
pub fn slot_lock_key(slot_id: SlotId) -> String {
    format!("lock:slot:{slot_id}")
}

/// A held slot lock: the slot, the holder token, and the TTL it was
/// granted for.
#[derive(Debug, Clone)]
pub struct SlotLease {
    /// The locked slot.
    pub slot_id: SlotId,
    /// Opaque holder token; release only succeeds for the holder.
    pub token: String,
    /// TTL granted at acquisition.
    pub ttl: Duration,
}

/// Errors from lock acquisition.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// Another holder currently owns the lock; the caller may retry.
    #[error("slot lock not acquired")]
    NotAcquired,
    /// The lock store failed.
    #[error(transparent)]
    Backend(#[from] Error),
}

/// Outcome of running a body under [`SlotLockManager::with_slot_lock`].
#[derive(Debug)]
pub enum LockRunError<E> {
    /// The lock was already held; nothing ran.
    NotAcquired,
    /// The body exceeded the lock TTL and was abandoned; another holder
    /// may have taken over, so its partial work must not be trusted.
    DeadlineExceeded,
    /// The lock store failed.
    Backend(Error),
    /// The body itself failed.
    Body(E),
}

/// Lock store abstraction keyed by slot.
#[async_trait]
pub trait SlotLocker: Send + Sync {
    /// Cheap connectivity probe for readiness checks.
    async fn ping(&self) -> std::result::Result<(), Error>;

    /// Attempts to acquire the slot lock once, without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::NotAcquired`] when another holder owns a live
    /// lock, or [`LockError::Backend`] when the lock store fails.
    async fn try_acquire(
        &self,
        slot_id: SlotId,
        ttl: Duration,
    ) -> std::result::Result<SlotLease, LockError>;

    /// Releases a held lease via compare-and-delete on the holder token.
    ///
    /// Idempotent: returns `Ok(false)` when the lock had already expired
    /// or belongs to another holder, leaving it untouched.
    ///
    /// # Errors
    ///
    /// Returns an error when the lock store fails.
    async fn release(&self, lease: &SlotLease) -> std::result::Result<bool, Error>;
}

/// Runs critical sections under per-slot locks with scoped release.
#[derive(Clone)]
pub struct SlotLockManager {
    locker: Arc<dyn SlotLocker>,
    ttl: Duration,
}

impl std::fmt::Debug for SlotLockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotLockManager")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl SlotLockManager {
    /// Creates a manager over the given lock store with a fixed TTL.
    #[must_use]
    pub fn new(locker: Arc<dyn SlotLocker>, ttl: Duration) -> Self {
        Self { locker, ttl }
    }

    /// Returns the configured lock TTL.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Acquires the slot lock, runs `body` under a deadline equal to the
    /// lock TTL, and releases on every exit path.
    ///
    /// A body that outlives the TTL is abandoned with
    /// [`LockRunError::DeadlineExceeded`] because the lock may already
    /// belong to someone else. If the surrounding future is cancelled at
    /// a suspension point, the release still runs best-effort from the
    /// guard; the TTL covers the remaining cases.
    ///
    /// # Errors
    ///
    /// Propagates acquisition failures, deadline overruns, and body
    /// errors; see [`LockRunError`].
    pub async fn with_slot_lock<T, E, F, Fut>(
        &self,
        slot_id: SlotId,
        body: F,
    ) -> std::result::Result<T, LockRunError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let lease = match self.locker.try_acquire(slot_id, self.ttl).await {
            Ok(lease) => lease,
            Err(LockError::NotAcquired) => return Err(LockRunError::NotAcquired),
            Err(LockError::Backend(e)) => return Err(LockRunError::Backend(e)),
        };
        let mut guard = ReleaseGuard {
            locker: Arc::clone(&self.locker),
            lease: Some(lease),
        };

        let outcome = tokio::time::timeout(self.ttl, body()).await;
        guard.release(slot_id).await;

        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(LockRunError::Body(e)),
            Err(_) => Err(LockRunError::DeadlineExceeded),
        }
    }
}

/// Releases the lease on drop if the explicit release never ran
/// (e.g. the critical section future was cancelled mid-await).
struct ReleaseGuard {
    locker: Arc<dyn SlotLocker>,
    lease: Option<SlotLease>,
}

impl ReleaseGuard {
    async fn release(&mut self, slot_id: SlotId) {
        if let Some(lease) = self.lease.take() {
            if let Err(e) = self.locker.release(&lease).await {
                tracing::warn!(slot_id = %slot_id, error = %e, "failed to release slot lock");
            }
        }
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        if let Some(lease) = self.lease.take() {
            // Best-effort async release in destructor; if no runtime is
            // available the TTL handles eventual cleanup.
            let Ok(handle) = tokio::runtime::Handle::try_current() else {
                return;
            };
            let locker = Arc::clone(&self.locker);
            handle.spawn(async move {
                let _ = locker.release(&lease).await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_key_shape() {
        let slot = SlotId::generate();
        assert_eq!(slot_lock_key(slot), format!("lock:slot:{slot}"));
    }

    #[tokio::test]
    async fn with_slot_lock_runs_body_and_releases() {
        let locker = Arc::new(MemoryLocker::new());
        let manager = SlotLockManager::new(locker.clone(), Duration::from_secs(5));
        let slot = SlotId::generate();

        let value: Result<u32, LockRunError<Error>> = manager
            .with_slot_lock(slot, || async { Ok::<_, Error>(7) })
            .await;
        assert_eq!(value.unwrap(), 7);

        // Released: a second section can run immediately.
        let again: Result<u32, LockRunError<Error>> = manager
            .with_slot_lock(slot, || async { Ok::<_, Error>(8) })
            .await;
        assert_eq!(again.unwrap(), 8);
    }

    #[tokio::test]
    async fn contended_lock_reports_not_acquired() {
        let locker = Arc::new(MemoryLocker::new());
        let manager = SlotLockManager::new(locker.clone(), Duration::from_secs(5));
        let slot = SlotId::generate();

        let held = locker
            .try_acquire(slot, Duration::from_secs(5))
            .await
            .unwrap();

        let result: Result<(), LockRunError<Error>> = manager
            .with_slot_lock(slot, || async { Ok::<_, Error>(()) })
            .await;
        assert!(matches!(result, Err(LockRunError::NotAcquired)));

        locker.release(&held).await.unwrap();
    }

    #[tokio::test]
    async fn body_error_still_releases() {
        let locker = Arc::new(MemoryLocker::new());
        let manager = SlotLockManager::new(locker.clone(), Duration::from_secs(5));
        let slot = SlotId::generate();

        let result: Result<(), LockRunError<&str>> = manager
            .with_slot_lock(slot, || async { Err("boom") })
            .await;
        assert!(matches!(result, Err(LockRunError::Body("boom"))));

        let reacquired = locker.try_acquire(slot, Duration::from_secs(1)).await;
        assert!(reacquired.is_ok());
    }

    #[tokio::test]
    async fn runaway_body_hits_the_ttl_deadline() {
        let locker = Arc::new(MemoryLocker::new());
        let manager = SlotLockManager::new(locker, Duration::from_millis(20));
        let slot = SlotId::generate();

        let result: Result<(), LockRunError<Error>> = manager
            .with_slot_lock(slot, || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(LockRunError::DeadlineExceeded)));
    }
}
