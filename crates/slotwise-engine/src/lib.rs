//! # slotwise-engine
//!
//! The reservation core of slotwise: the persistence port with its
//! backends, the per-slot lock port, the reservation engine that drives
//! the appointment lifecycle, and the background expiry worker.
//!
//! ## Design Principles
//!
//! - **Layered defence**: the distributed slot lock is a contention
//!   filter; the store's confirmed-slot uniqueness rule is the safety
//!   barrier. Both layers are always present.
//! - **Conditional update as transition primitive**: every lifecycle
//!   change is an atomic `(id, from) -> to` update, so no serialisable
//!   transactions or leader election are needed.
//! - **One clock**: all time arithmetic goes through the injected
//!   [`Clock`](slotwise_core::Clock), keeping expiry behaviour testable.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod engine;
pub mod error;
pub mod expirer;
pub mod lock;
pub mod store;

pub use engine::{MAX_LIST_LIMIT, ReservationEngine};
pub use error::{EngineError, EngineResult};
pub use expirer::ExpiryWorker;
pub use lock::{LockRunError, MemoryLocker, RedisLocker, SlotLease, SlotLockManager, SlotLocker};
pub use store::{MemoryStore, ReservationStore, SledStore};
