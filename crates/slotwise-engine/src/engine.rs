//! The reservation engine: orchestrates create/confirm/expire and the
//! hydrated reads, enforcing the appointment state machine.
//!
//! ## Concurrency scheme
//!
//! `create` runs its recheck-and-insert inside the per-slot critical
//! section. `confirm` and `expire_pending` bypass the distributed lock
//! entirely: the store's conditional `(id, from) -> to` update plus the
//! confirmed-slot uniqueness rule serialise the decision. Two concurrent
//! creates may both land as Pending for the same slot; only one of them
//! can ever reach Confirmed.

use std::sync::Arc;

use chrono::Duration;
use serde_json::Value;
use tracing::Instrument;

use slotwise_core::error::EntityKind;
use slotwise_core::event::{confirmed_payload, created_payload, expired_payload};
use slotwise_core::observability::reservation_span;
use slotwise_core::{
    Appointment, AppointmentDetail, AppointmentId, AppointmentStatus, Clock, Error, EventKind,
    ExpiryReason, PatientId, SlotId, SlotStatus,
};

use crate::error::{EngineError, EngineResult};
use crate::lock::{LockRunError, SlotLockManager};
use crate::store::ReservationStore;

/// Maximum page size for hydrated listings.
pub const MAX_LIST_LIMIT: usize = 100;

/// The reservation engine.
///
/// Cheap to clone; all state is shared behind `Arc`s.
#[derive(Clone)]
pub struct ReservationEngine {
    store: Arc<dyn ReservationStore>,
    locks: SlotLockManager,
    clock: Arc<dyn Clock>,
    hold_ttl: Duration,
}

impl std::fmt::Debug for ReservationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReservationEngine")
            .field("locks", &self.locks)
            .field("hold_ttl", &self.hold_ttl)
            .finish_non_exhaustive()
    }
}

impl ReservationEngine {
    /// Creates an engine over the given store, lock manager and clock.
    ///
    /// `hold_ttl` is how long a pending appointment reserves its slot
    /// before auto-releasing.
    #[must_use]
    pub fn new(
        store: Arc<dyn ReservationStore>,
        locks: SlotLockManager,
        clock: Arc<dyn Clock>,
        hold_ttl: Duration,
    ) -> Self {
        Self {
            store,
            locks,
            clock,
            hold_ttl,
        }
    }

    /// Returns the underlying store.
    #[must_use]
    pub fn store(&self) -> Arc<dyn ReservationStore> {
        Arc::clone(&self.store)
    }

    /// Reserves `slot_id` for `patient_id` with a pending hold.
    ///
    /// The pre-lock validations are fast-path rejections; only the
    /// confirmed-row check is re-done inside the lock because it is the
    /// one condition that can race.
    ///
    /// # Errors
    ///
    /// - `PatientNotFound` / `SlotNotFound` when a reference is missing
    /// - `SlotNotOpen` when the slot is blocked or deleted
    /// - `SlotAlreadyBooked` when a confirmed appointment exists (seen in
    ///   the recheck or reported by the store's uniqueness rule)
    /// - `SlotBeingBooked` when the slot lock is held by another request
    pub async fn create(
        &self,
        slot_id: SlotId,
        patient_id: PatientId,
    ) -> EngineResult<Appointment> {
        let span = reservation_span("create", &slot_id.to_string());
        self.create_inner(slot_id, patient_id).instrument(span).await
    }

    async fn create_inner(
        &self,
        slot_id: SlotId,
        patient_id: PatientId,
    ) -> EngineResult<Appointment> {
        self.store.patient(patient_id).await.map_err(|e| {
            if e.is_not_found(EntityKind::Patient) {
                EngineError::PatientNotFound(patient_id)
            } else {
                EngineError::Store(e)
            }
        })?;

        let slot = self.store.slot(slot_id).await.map_err(|e| {
            if e.is_not_found(EntityKind::Slot) {
                EngineError::SlotNotFound(slot_id)
            } else {
                EngineError::Store(e)
            }
        })?;
        if slot.status != SlotStatus::Open {
            return Err(EngineError::SlotNotOpen(slot_id));
        }

        let outcome = self
            .locks
            .with_slot_lock(slot_id, || async move {
                match self.store.confirmed_appointment_for_slot(slot_id).await {
                    Ok(_) => return Err(EngineError::SlotAlreadyBooked(slot_id)),
                    Err(e) if e.is_not_found(EntityKind::Appointment) => {}
                    Err(e) => return Err(EngineError::Store(e)),
                }

                let now = self.clock.now();
                let expires_at = now + self.hold_ttl;
                let appointment = self
                    .store
                    .insert_pending(slot_id, patient_id, expires_at, now)
                    .await
                    .map_err(|e| match e {
                        Error::Conflict { .. } => EngineError::SlotAlreadyBooked(slot_id),
                        other => EngineError::Store(other),
                    })?;

                self.log_event(
                    EventKind::AppointmentCreated,
                    appointment.id,
                    created_payload(slot_id, patient_id, expires_at),
                )
                .await;

                Ok(appointment)
            })
            .await;

        match outcome {
            Ok(appointment) => Ok(appointment),
            Err(LockRunError::NotAcquired) => Err(EngineError::SlotBeingBooked(slot_id)),
            Err(LockRunError::DeadlineExceeded) => Err(EngineError::Store(Error::Internal {
                message: format!("slot {slot_id} critical section exceeded the lock TTL"),
            })),
            Err(LockRunError::Backend(e)) => Err(EngineError::Store(e)),
            Err(LockRunError::Body(e)) => Err(e),
        }
    }

    /// Confirms a pending appointment.
    ///
    /// No distributed lock is needed: the conditional Pending ->
    /// Confirmed update plus the confirmed-slot uniqueness rule serialise
    /// the decision among all contenders.
    ///
    /// # Errors
    ///
    /// - `AppointmentNotFound` when the appointment does not exist
    /// - `AppointmentExpired` when the hold has lapsed (the row is
    ///   best-effort transitioned to Expired on the way out)
    /// - `InvalidStatusTransition` when the row is in any other
    ///   non-Pending status
    /// - `SlotAlreadyBooked` when another pending hold confirmed first
    pub async fn confirm(&self, id: AppointmentId) -> EngineResult<Appointment> {
        let appointment = self.store.appointment(id).await.map_err(|e| {
            if e.is_not_found(EntityKind::Appointment) {
                EngineError::AppointmentNotFound(id)
            } else {
                EngineError::Store(e)
            }
        })?;

        let span = reservation_span("confirm", &appointment.slot_id.to_string());
        self.confirm_inner(id, appointment).instrument(span).await
    }

    async fn confirm_inner(
        &self,
        id: AppointmentId,
        appointment: Appointment,
    ) -> EngineResult<Appointment> {
        if appointment.status == AppointmentStatus::Expired {
            return Err(EngineError::AppointmentExpired(id));
        }

        let now = self.clock.now();
        if appointment.is_expired_at(now) {
            // The hold lapsed before the worker got to it: reclaim it on
            // the spot, tolerating a concurrent expirer having won.
            match self
                .store
                .transition_status(
                    id,
                    AppointmentStatus::Pending,
                    AppointmentStatus::Expired,
                    now,
                )
                .await
            {
                Ok(_) | Err(Error::NotFound { .. }) => {}
                Err(e) => {
                    tracing::warn!(appointment_id = %id, error = %e,
                        "failed to mark appointment expired during confirm");
                }
            }
            self.log_event(
                EventKind::AppointmentExpired,
                id,
                expired_payload(ExpiryReason::ConfirmAfterExpiry),
            )
            .await;
            return Err(EngineError::AppointmentExpired(id));
        }

        if appointment.status != AppointmentStatus::Pending {
            return Err(EngineError::InvalidStatusTransition {
                id,
                status: appointment.status,
            });
        }

        let updated = match self
            .store
            .transition_status(
                id,
                AppointmentStatus::Pending,
                AppointmentStatus::Confirmed,
                now,
            )
            .await
        {
            Ok(updated) => updated,
            Err(Error::NotFound { .. }) => {
                // The row changed beneath us (concurrent expirer or a
                // duplicate confirm). Reload and report what happened.
                return Err(self.reload_confirm_conflict(id).await);
            }
            Err(Error::Conflict { .. }) => {
                return Err(EngineError::SlotAlreadyBooked(appointment.slot_id));
            }
            Err(e) => return Err(EngineError::Store(e)),
        };

        self.log_event(EventKind::AppointmentConfirmed, id, confirmed_payload())
            .await;

        Ok(updated)
    }

    /// Transitions every lapsed pending hold to Expired.
    ///
    /// Intended to be called periodically by the expiry worker. Per-item
    /// failures are logged and skipped; a lost race (`NotFound`) means
    /// someone else handled the row. Returns the number of appointments
    /// this call expired.
    ///
    /// # Errors
    ///
    /// Fails only when the initial scan fails.
    pub async fn expire_pending(&self) -> EngineResult<usize> {
        let now = self.clock.now();
        let candidates = self.store.find_expired_pending(now).await?;

        let mut expired = 0usize;
        for appointment in candidates {
            match self
                .store
                .transition_status(
                    appointment.id,
                    AppointmentStatus::Pending,
                    AppointmentStatus::Expired,
                    now,
                )
                .await
            {
                Ok(_) => {
                    self.log_event(
                        EventKind::AppointmentExpired,
                        appointment.id,
                        expired_payload(ExpiryReason::Worker),
                    )
                    .await;
                    expired += 1;
                }
                Err(Error::NotFound { .. }) => {}
                Err(e) => {
                    tracing::warn!(appointment_id = %appointment.id, error = %e,
                        "failed to expire appointment");
                }
            }
        }
        Ok(expired)
    }

    /// Hydrated read of one appointment.
    ///
    /// # Errors
    ///
    /// - `AppointmentNotFound` when it does not exist
    /// - `Integrity` when the joined identifiers disagree
    pub async fn appointment_detail(&self, id: AppointmentId) -> EngineResult<AppointmentDetail> {
        self.store
            .appointment_detail(id)
            .await
            .map_err(|e| Self::map_read_error(e, id))
    }

    /// Hydrated appointments for a patient, newest first.
    ///
    /// `limit` is clamped to [`MAX_LIST_LIMIT`].
    ///
    /// # Errors
    ///
    /// Propagates store failures; `Integrity` when any joined row is
    /// incoherent.
    pub async fn list_by_patient(
        &self,
        patient_id: PatientId,
        limit: usize,
        offset: usize,
    ) -> EngineResult<Vec<AppointmentDetail>> {
        let limit = limit.min(MAX_LIST_LIMIT);
        self.store
            .list_by_patient(patient_id, limit, offset)
            .await
            .map_err(Self::map_list_error)
    }

    /// Hydrated appointments for a slot, newest first.
    ///
    /// # Errors
    ///
    /// Propagates store failures; `Integrity` when any joined row is
    /// incoherent.
    pub async fn list_by_slot(&self, slot_id: SlotId) -> EngineResult<Vec<AppointmentDetail>> {
        self.store
            .list_by_slot(slot_id)
            .await
            .map_err(Self::map_list_error)
    }

    async fn reload_confirm_conflict(&self, id: AppointmentId) -> EngineError {
        match self.store.appointment(id).await {
            Ok(reloaded) if reloaded.status == AppointmentStatus::Expired => {
                EngineError::AppointmentExpired(id)
            }
            Ok(reloaded) => EngineError::InvalidStatusTransition {
                id,
                status: reloaded.status,
            },
            Err(e) if e.is_not_found(EntityKind::Appointment) => {
                EngineError::AppointmentNotFound(id)
            }
            Err(e) => EngineError::Store(e),
        }
    }

    fn map_read_error(e: Error, id: AppointmentId) -> EngineError {
        match e {
            Error::NotFound { .. } => EngineError::AppointmentNotFound(id),
            Error::IntegrityViolation { message } => {
                tracing::error!(appointment_id = %id, %message,
                    "hydrated read returned incoherent entities");
                EngineError::Integrity { message }
            }
            other => EngineError::Store(other),
        }
    }

    fn map_list_error(e: Error) -> EngineError {
        match e {
            Error::IntegrityViolation { message } => {
                tracing::error!(%message, "hydrated listing returned incoherent entities");
                EngineError::Integrity { message }
            }
            other => EngineError::Store(other),
        }
    }

    /// Appends an audit event, swallowing failures.
    ///
    /// The business operation has already committed by the time this
    /// runs; a lost event leaves the log lagging, which operators accept
    /// because the appointment table is the system of record.
    async fn log_event(&self, kind: EventKind, appointment_id: AppointmentId, payload: Value) {
        let now = self.clock.now();
        if let Err(e) = self
            .store
            .append_event(kind, Some(appointment_id), payload, now)
            .await
        {
            tracing::warn!(event = %kind, appointment_id = %appointment_id, error = %e,
                "failed to append audit event");
        }
    }
}
