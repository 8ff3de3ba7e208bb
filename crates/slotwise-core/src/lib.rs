//! # slotwise-core
//!
//! Core abstractions for the slotwise reservation service.
//!
//! This crate provides the foundational types used across all slotwise
//! components:
//!
//! - **Identifiers**: Strongly-typed IDs for patients, clinicians, slots,
//!   and appointments
//! - **Entity Model**: Slots, appointments and the appointment lifecycle
//!   state machine
//! - **Events**: The audit event vocabulary and record shape
//! - **Clock**: An injectable time source so expiry arithmetic is testable
//! - **Error Types**: Shared error definitions and result types
//!
//! ## Crate Boundary
//!
//! `slotwise-core` is the only crate allowed to define shared primitives.
//! The engine and API crates build on the contracts defined here.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod clock;
pub mod error;
pub mod event;
pub mod id;
pub mod model;
pub mod observability;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use slotwise_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::error::{EntityKind, Error, Result};
    pub use crate::event::{EventKind, EventRecord, ExpiryReason};
    pub use crate::id::{AppointmentId, ClinicianId, PatientId, SlotId};
    pub use crate::model::{
        Appointment, AppointmentDetail, AppointmentStatus, Clinician, Patient, Slot, SlotStatus,
    };
}

// Re-export key types at crate root for ergonomics
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{EntityKind, Error, Result};
pub use event::{EventKind, EventRecord, ExpiryReason};
pub use id::{AppointmentId, ClinicianId, PatientId, SlotId};
pub use model::{
    Appointment, AppointmentDetail, AppointmentStatus, Clinician, Patient, Slot, SlotStatus,
};
pub use observability::{LogFormat, init_logging};
