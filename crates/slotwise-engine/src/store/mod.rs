//! The persistence port for reservation state.
//!
//! [`ReservationStore`] is the narrow, transactional contract the engine
//! sees; query composition lives entirely inside the backends.
//!
//! ## Design Principles
//!
//! - **Atomic primitives over transactions**: every multi-step invariant
//!   is enforced by a single conditional operation (the status transition
//!   and the confirmed-slot uniqueness check), never by long-running
//!   transactions.
//! - **Caller-stamped time**: expiry and `updated_at` timestamps are
//!   supplied by the engine so all time arithmetic goes through one clock.
//! - **Testability**: an in-memory backend for tests and development, a
//!   sled backend for durable single-node deployments.

pub mod memory;
pub mod sled;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use slotwise_core::{
    Appointment, AppointmentDetail, AppointmentId, AppointmentStatus, Clinician, ClinicianId,
    EventKind, EventRecord, Patient, PatientId, Result, Slot, SlotId,
};

pub use self::memory::MemoryStore;
pub use self::sled::SledStore;

/// Storage abstraction for reservation state.
///
/// ## Error contract
///
/// - Lookups fail with `Error::NotFound` carrying the entity kind.
/// - `insert_pending` fails with `Error::Conflict` when the
///   confirmed-slot uniqueness rule rejects the write (the last-line
///   defence fire path).
/// - `transition_status` returns `Error::NotFound` when no row matched
///   `(id, from)` - the primitive is idempotent under loss-of-ack retries
///   when paired with a read-then-retry pattern.
/// - Hydrated reads fail with `Error::IntegrityViolation` when joined
///   identifiers disagree instead of returning garbage.
///
/// ## Thread Safety
///
/// All methods are `Send + Sync` to support concurrent access from
/// multiple engine calls sharing one backend.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Cheap connectivity probe for readiness checks.
    async fn ping(&self) -> Result<()>;

    // --- Entity lookups ---

    /// Gets a patient by ID.
    async fn patient(&self, id: PatientId) -> Result<Patient>;

    /// Gets a clinician by ID.
    async fn clinician(&self, id: ClinicianId) -> Result<Clinician>;

    /// Gets a slot by ID.
    async fn slot(&self, id: SlotId) -> Result<Slot>;

    /// Gets an appointment by ID.
    async fn appointment(&self, id: AppointmentId) -> Result<Appointment>;

    /// Returns the unique Confirmed appointment for a slot, if any.
    async fn confirmed_appointment_for_slot(&self, slot_id: SlotId) -> Result<Appointment>;

    // --- Creation and transitions ---

    /// Atomically inserts a Pending appointment with a caller-stamped
    /// expiry.
    ///
    /// Verifies referential integrity (slot and patient must exist) and
    /// that `expires_at > now`. Fails with `Error::Conflict` when the
    /// slot already carries a Confirmed appointment.
    async fn insert_pending(
        &self,
        slot_id: SlotId,
        patient_id: PatientId,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Appointment>;

    /// Atomically updates exactly the row with `(id, status = from)` to
    /// `to`, bumping `updated_at`.
    ///
    /// Returns the updated row, or `Error::NotFound` when the current
    /// status is not `from` (someone else transitioned it first). When
    /// `to` is Confirmed, also claims the slot in the confirmed-slot
    /// index and fails with `Error::Conflict` when another appointment
    /// already holds it.
    async fn transition_status(
        &self,
        id: AppointmentId,
        from: AppointmentStatus,
        to: AppointmentStatus,
        now: DateTime<Utc>,
    ) -> Result<Appointment>;

    // --- Expiry worker ---

    /// Returns all Pending appointments with `expires_at < now`.
    /// Unordered.
    async fn find_expired_pending(&self, now: DateTime<Utc>) -> Result<Vec<Appointment>>;

    // --- Event logging ---

    /// Appends an audit event, assigning the next sequence number.
    async fn append_event(
        &self,
        kind: EventKind,
        appointment_id: Option<AppointmentId>,
        payload: Value,
        now: DateTime<Utc>,
    ) -> Result<EventRecord>;

    /// Returns all events referencing an appointment, in sequence order.
    async fn events_for_appointment(&self, id: AppointmentId) -> Result<Vec<EventRecord>>;

    // --- Hydrated reads ---

    /// Single-read composite view of an appointment with its slot,
    /// patient and owning clinician, verified for id coherence.
    async fn appointment_detail(&self, id: AppointmentId) -> Result<AppointmentDetail>;

    /// Hydrated appointments for a patient, `created_at` descending.
    async fn list_by_patient(
        &self,
        patient_id: PatientId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<AppointmentDetail>>;

    /// Hydrated appointments for a slot, `created_at` descending.
    async fn list_by_slot(&self, slot_id: SlotId) -> Result<Vec<AppointmentDetail>>;

    // --- Provisioning (seeding and tests) ---

    /// Inserts a patient.
    async fn insert_patient(&self, patient: Patient) -> Result<()>;

    /// Inserts a clinician.
    async fn insert_clinician(&self, clinician: Clinician) -> Result<()>;

    /// Inserts a slot after validating its interval, capacity, owning
    /// clinician, and `(clinician, start, end)` uniqueness.
    async fn insert_slot(&self, slot: Slot) -> Result<()>;
}
