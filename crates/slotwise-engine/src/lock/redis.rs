//! Redis-backed distributed slot locks.
//!
//! Acquisition is a single `SET key token NX PX ttl`; at most one caller
//! wins and the key self-expires after the TTL. Release is a Lua
//! compare-and-delete so only the token holder can delete the key; a
//! TTL-expired or taken-over lock is left untouched.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{Client, Script};
use ulid::Ulid;

use slotwise_core::{Error, SlotId};

use super::{LockError, SlotLease, SlotLocker, slot_lock_key};

const UNLOCK_SCRIPT: &str = r#"
local val = redis.call("GET", KEYS[1])
if val == ARGV[1] then
  return redis.call("DEL", KEYS[1])
else
  return 0
end
"#;

/// Distributed slot lock store over Redis.
pub struct RedisLocker {
    conn: MultiplexedConnection,
    unlock: Script,
}

impl std::fmt::Debug for RedisLocker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisLocker").finish_non_exhaustive()
    }
}

fn backend_err(e: redis::RedisError) -> Error {
    Error::storage(format!("redis: {e}"))
}

impl RedisLocker {
    /// Connects to the lock store and verifies connectivity with a ping.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the URL is invalid or the server is
    /// unreachable.
    pub async fn connect(url: &str) -> Result<Self, Error> {
        let client = Client::open(url).map_err(backend_err)?;
        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(backend_err)?;

        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(backend_err)?;

        Ok(Self {
            conn,
            unlock: Script::new(UNLOCK_SCRIPT),
        })
    }
}

#[async_trait]
impl SlotLocker for RedisLocker {
    async fn ping(&self) -> std::result::Result<(), Error> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn try_acquire(
        &self,
        slot_id: SlotId,
        ttl: Duration,
    ) -> std::result::Result<SlotLease, LockError> {
        let key = slot_lock_key(slot_id);
        let token = Ulid::new().to_string();
        let ttl_millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);

        let mut conn = self.conn.clone();
        let acquired: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis)
            .query_async(&mut conn)
            .await
            .map_err(|e| LockError::Backend(backend_err(e)))?;

        if acquired.is_none() {
            return Err(LockError::NotAcquired);
        }

        Ok(SlotLease {
            slot_id,
            token,
            ttl,
        })
    }

    async fn release(&self, lease: &SlotLease) -> std::result::Result<bool, Error> {
        let key = slot_lock_key(lease.slot_id);
        let mut conn = self.conn.clone();

        let deleted: i64 = self
            .unlock
            .key(&key)
            .arg(&lease.token)
            .invoke_async(&mut conn)
            .await
            .map_err(backend_err)?;

        Ok(deleted == 1)
    }
}
