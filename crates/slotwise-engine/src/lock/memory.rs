//! In-process lock store for testing and development.
//!
//! Single-process only: locks live in a process-local table, so this
//! backend cannot coordinate across instances. TTL semantics match the
//! distributed backend, including takeover of expired locks.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ulid::Ulid;

use slotwise_core::{Error, SlotId};

use super::{LockError, SlotLease, SlotLocker};

#[derive(Debug)]
struct HeldLock {
    token: String,
    deadline: Instant,
}

/// Process-local slot lock table.
#[derive(Debug, Default)]
pub struct MemoryLocker {
    held: Mutex<HashMap<SlotId, HeldLock>>,
}

fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("lock table poisoned")
}

impl MemoryLocker {
    /// Creates an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SlotLocker for MemoryLocker {
    async fn ping(&self) -> std::result::Result<(), Error> {
        self.held.lock().map_err(poison_err).map(|_| ())
    }

    async fn try_acquire(
        &self,
        slot_id: SlotId,
        ttl: Duration,
    ) -> std::result::Result<SlotLease, LockError> {
        let mut held = self.held.lock().map_err(poison_err)?;
        let now = Instant::now();

        if let Some(existing) = held.get(&slot_id) {
            if existing.deadline > now {
                return Err(LockError::NotAcquired);
            }
            // Expired lock: take it over.
        }

        let token = Ulid::new().to_string();
        held.insert(
            slot_id,
            HeldLock {
                token: token.clone(),
                deadline: now + ttl,
            },
        );
        Ok(SlotLease {
            slot_id,
            token,
            ttl,
        })
    }

    async fn release(&self, lease: &SlotLease) -> std::result::Result<bool, Error> {
        let mut held = self.held.lock().map_err(poison_err)?;
        match held.get(&lease.slot_id) {
            Some(existing) if existing.token == lease.token => {
                held.remove(&lease.slot_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
