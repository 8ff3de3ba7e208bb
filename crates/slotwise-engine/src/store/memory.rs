//! In-memory store implementation for testing and development.
//!
//! Provides [`MemoryStore`], a thread-safe implementation of the
//! [`ReservationStore`] trait backed by `RwLock`ed maps.
//!
//! ## Limitations
//!
//! - **NOT suitable for production**: no durability, no cross-process
//!   coordination
//! - **Single-process only**: state is not shared across process
//!   boundaries

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use slotwise_core::error::EntityKind;
use slotwise_core::{
    Appointment, AppointmentDetail, AppointmentId, AppointmentStatus, Clinician, ClinicianId,
    Error, EventKind, EventRecord, Patient, PatientId, Result, Slot, SlotId,
};

use super::ReservationStore;

/// In-memory reservation store.
///
/// All invariants the durable backend enforces (confirmed-slot
/// uniqueness, expiry well-formedness, referential integrity, slot
/// interval uniqueness) are enforced here under a single write lock, so
/// engine tests exercise the same error surface.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    patients: HashMap<PatientId, Patient>,
    clinicians: HashMap<ClinicianId, Clinician>,
    slots: HashMap<SlotId, Slot>,
    appointments: HashMap<AppointmentId, Appointment>,
    /// The partial-uniqueness rule: at most one Confirmed appointment per
    /// slot, keyed by slot.
    confirmed_by_slot: HashMap<SlotId, AppointmentId>,
    events: Vec<EventRecord>,
    next_sequence: u64,
}

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("lock poisoned")
}

impl MemoryStore {
    /// Creates a new, empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of recorded events.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn event_count(&self) -> Result<usize> {
        let count = self.inner.read().map_err(poison_err)?.events.len();
        Ok(count)
    }

    fn hydrate(inner: &Inner, appointment: &Appointment) -> Result<AppointmentDetail> {
        let slot = inner
            .slots
            .get(&appointment.slot_id)
            .cloned()
            .ok_or_else(|| {
                Error::integrity(format!(
                    "appointment {} references missing slot {}",
                    appointment.id, appointment.slot_id
                ))
            })?;
        let patient = inner
            .patients
            .get(&appointment.patient_id)
            .cloned()
            .ok_or_else(|| {
                Error::integrity(format!(
                    "appointment {} references missing patient {}",
                    appointment.id, appointment.patient_id
                ))
            })?;
        let clinician = inner
            .clinicians
            .get(&slot.clinician_id)
            .cloned()
            .ok_or_else(|| {
                Error::integrity(format!(
                    "slot {} references missing clinician {}",
                    slot.id, slot.clinician_id
                ))
            })?;

        let detail = AppointmentDetail {
            appointment: appointment.clone(),
            slot,
            patient,
            clinician,
        };
        detail.verify_coherence()?;
        Ok(detail)
    }

    fn collect_details<F>(&self, filter: F, limit: usize, offset: usize) -> Result<Vec<AppointmentDetail>>
    where
        F: Fn(&Appointment) -> bool,
    {
        let inner = self.inner.read().map_err(poison_err)?;

        let mut matched: Vec<&Appointment> =
            inner.appointments.values().filter(|a| filter(a)).collect();
        matched.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });

        matched
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|a| Self::hydrate(&inner, a))
            .collect()
    }
}

#[async_trait]
impl ReservationStore for MemoryStore {
    async fn ping(&self) -> Result<()> {
        self.inner.read().map_err(poison_err).map(|_| ())
    }

    async fn patient(&self, id: PatientId) -> Result<Patient> {
        let inner = self.inner.read().map_err(poison_err)?;
        inner
            .patients
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found(EntityKind::Patient, id))
    }

    async fn clinician(&self, id: ClinicianId) -> Result<Clinician> {
        let inner = self.inner.read().map_err(poison_err)?;
        inner
            .clinicians
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found(EntityKind::Clinician, id))
    }

    async fn slot(&self, id: SlotId) -> Result<Slot> {
        let inner = self.inner.read().map_err(poison_err)?;
        inner
            .slots
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found(EntityKind::Slot, id))
    }

    async fn appointment(&self, id: AppointmentId) -> Result<Appointment> {
        let inner = self.inner.read().map_err(poison_err)?;
        inner
            .appointments
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found(EntityKind::Appointment, id))
    }

    async fn confirmed_appointment_for_slot(&self, slot_id: SlotId) -> Result<Appointment> {
        let inner = self.inner.read().map_err(poison_err)?;
        inner
            .confirmed_by_slot
            .get(&slot_id)
            .and_then(|id| inner.appointments.get(id))
            .cloned()
            .ok_or_else(|| Error::not_found(EntityKind::Appointment, slot_id))
    }

    async fn insert_pending(
        &self,
        slot_id: SlotId,
        patient_id: PatientId,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Appointment> {
        let mut inner = self.inner.write().map_err(poison_err)?;

        if !inner.slots.contains_key(&slot_id) {
            return Err(Error::not_found(EntityKind::Slot, slot_id));
        }
        if !inner.patients.contains_key(&patient_id) {
            return Err(Error::not_found(EntityKind::Patient, patient_id));
        }
        // Last-line defence: a confirmed slot rejects new holds even if
        // the caller's recheck raced.
        if inner.confirmed_by_slot.contains_key(&slot_id) {
            return Err(Error::conflict(format!(
                "slot {slot_id} already has a confirmed appointment"
            )));
        }

        let appointment = Appointment {
            id: AppointmentId::generate(),
            slot_id,
            patient_id,
            status: AppointmentStatus::Pending,
            created_at: now,
            updated_at: now,
            expires_at: Some(expires_at),
        };
        appointment.validate_expiry()?;

        inner.appointments.insert(appointment.id, appointment.clone());
        Ok(appointment)
    }

    async fn transition_status(
        &self,
        id: AppointmentId,
        from: AppointmentStatus,
        to: AppointmentStatus,
        now: DateTime<Utc>,
    ) -> Result<Appointment> {
        let mut inner = self.inner.write().map_err(poison_err)?;

        let current = inner
            .appointments
            .get(&id)
            .ok_or_else(|| Error::not_found(EntityKind::Appointment, id))?;

        if current.status != from {
            // No row matched (id, from): the conditional update is a no-op.
            return Err(Error::not_found(EntityKind::Appointment, id));
        }
        if !from.can_transition_to(to) {
            return Err(Error::InvalidInput(format!(
                "illegal status transition {from} -> {to} for appointment {id}"
            )));
        }

        let slot_id = current.slot_id;
        if to == AppointmentStatus::Confirmed {
            if let Some(existing) = inner.confirmed_by_slot.get(&slot_id) {
                if *existing != id {
                    return Err(Error::conflict(format!(
                        "slot {slot_id} already has a confirmed appointment"
                    )));
                }
            }
            inner.confirmed_by_slot.insert(slot_id, id);
        }

        let appointment = inner
            .appointments
            .get_mut(&id)
            .ok_or_else(|| Error::not_found(EntityKind::Appointment, id))?;
        appointment.status = to;
        appointment.updated_at = now;
        Ok(appointment.clone())
    }

    async fn find_expired_pending(&self, now: DateTime<Utc>) -> Result<Vec<Appointment>> {
        let inner = self.inner.read().map_err(poison_err)?;
        Ok(inner
            .appointments
            .values()
            .filter(|a| a.status == AppointmentStatus::Pending && a.is_expired_at(now))
            .cloned()
            .collect())
    }

    async fn append_event(
        &self,
        kind: EventKind,
        appointment_id: Option<AppointmentId>,
        payload: Value,
        now: DateTime<Utc>,
    ) -> Result<EventRecord> {
        let mut inner = self.inner.write().map_err(poison_err)?;
        inner.next_sequence += 1;
        let record = EventRecord {
            sequence: inner.next_sequence,
            kind,
            appointment_id,
            payload,
            created_at: now,
        };
        inner.events.push(record.clone());
        Ok(record)
    }

    async fn events_for_appointment(&self, id: AppointmentId) -> Result<Vec<EventRecord>> {
        let inner = self.inner.read().map_err(poison_err)?;
        Ok(inner
            .events
            .iter()
            .filter(|e| e.appointment_id == Some(id))
            .cloned()
            .collect())
    }

    async fn appointment_detail(&self, id: AppointmentId) -> Result<AppointmentDetail> {
        let inner = self.inner.read().map_err(poison_err)?;
        let appointment = inner
            .appointments
            .get(&id)
            .ok_or_else(|| Error::not_found(EntityKind::Appointment, id))?;
        Self::hydrate(&inner, appointment)
    }

    async fn list_by_patient(
        &self,
        patient_id: PatientId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<AppointmentDetail>> {
        self.collect_details(|a| a.patient_id == patient_id, limit, offset)
    }

    async fn list_by_slot(&self, slot_id: SlotId) -> Result<Vec<AppointmentDetail>> {
        self.collect_details(|a| a.slot_id == slot_id, usize::MAX, 0)
    }

    async fn insert_patient(&self, patient: Patient) -> Result<()> {
        let mut inner = self.inner.write().map_err(poison_err)?;
        inner.patients.insert(patient.id, patient);
        Ok(())
    }

    async fn insert_clinician(&self, clinician: Clinician) -> Result<()> {
        let mut inner = self.inner.write().map_err(poison_err)?;
        inner.clinicians.insert(clinician.id, clinician);
        Ok(())
    }

    async fn insert_slot(&self, slot: Slot) -> Result<()> {
        slot.validate()?;

        let mut inner = self.inner.write().map_err(poison_err)?;
        if !inner.clinicians.contains_key(&slot.clinician_id) {
            return Err(Error::not_found(EntityKind::Clinician, slot.clinician_id));
        }
        let duplicate = inner.slots.values().any(|s| {
            s.id != slot.id
                && s.clinician_id == slot.clinician_id
                && s.start_time == slot.start_time
                && s.end_time == slot.end_time
        });
        if duplicate {
            return Err(Error::conflict(format!(
                "slot for clinician {} at [{}, {}) already exists",
                slot.clinician_id, slot.start_time, slot.end_time
            )));
        }
        inner.slots.insert(slot.id, slot);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotwise_core::SlotStatus;

    async fn seed(store: &MemoryStore) -> (PatientId, SlotId) {
        let now = Utc::now();
        let clinician = Clinician {
            id: ClinicianId::generate(),
            name: "Dr. Okafor".to_string(),
            specialty: None,
            created_at: now,
            updated_at: now,
        };
        let patient = Patient {
            id: PatientId::generate(),
            name: "Ada".to_string(),
            email: Some("ada@example.com".to_string()),
            created_at: now,
            updated_at: now,
        };
        let slot = Slot {
            id: SlotId::generate(),
            clinician_id: clinician.id,
            start_time: now + chrono::Duration::hours(1),
            end_time: now + chrono::Duration::hours(2),
            status: SlotStatus::Open,
            capacity: 1,
            created_at: now,
            updated_at: now,
        };
        let (patient_id, slot_id) = (patient.id, slot.id);

        store.insert_clinician(clinician).await.unwrap();
        store.insert_patient(patient).await.unwrap();
        store.insert_slot(slot).await.unwrap();
        (patient_id, slot_id)
    }

    #[tokio::test]
    async fn lookup_missing_entities() {
        let store = MemoryStore::new();
        assert!(store
            .patient(PatientId::generate())
            .await
            .unwrap_err()
            .is_not_found(EntityKind::Patient));
        assert!(store
            .slot(SlotId::generate())
            .await
            .unwrap_err()
            .is_not_found(EntityKind::Slot));
        assert!(store
            .appointment(AppointmentId::generate())
            .await
            .unwrap_err()
            .is_not_found(EntityKind::Appointment));
    }

    #[tokio::test]
    async fn insert_pending_requires_references() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let err = store
            .insert_pending(
                SlotId::generate(),
                PatientId::generate(),
                now + chrono::Duration::minutes(10),
                now,
            )
            .await
            .unwrap_err();
        assert!(err.is_not_found(EntityKind::Slot));
    }

    #[tokio::test]
    async fn insert_pending_rejects_expiry_before_creation() {
        let store = MemoryStore::new();
        let (patient_id, slot_id) = seed(&store).await;
        let now = Utc::now();

        let err = store
            .insert_pending(slot_id, patient_id, now - chrono::Duration::seconds(1), now)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn conditional_transition_matches_exactly_one_row() {
        let store = MemoryStore::new();
        let (patient_id, slot_id) = seed(&store).await;
        let now = Utc::now();

        let appt = store
            .insert_pending(slot_id, patient_id, now + chrono::Duration::minutes(10), now)
            .await
            .unwrap();

        let confirmed = store
            .transition_status(
                appt.id,
                AppointmentStatus::Pending,
                AppointmentStatus::Confirmed,
                now,
            )
            .await
            .unwrap();
        assert_eq!(confirmed.status, AppointmentStatus::Confirmed);

        // Second identical transition finds no (id, Pending) row.
        let err = store
            .transition_status(
                appt.id,
                AppointmentStatus::Pending,
                AppointmentStatus::Confirmed,
                now,
            )
            .await
            .unwrap_err();
        assert!(err.is_not_found(EntityKind::Appointment));
    }

    #[tokio::test]
    async fn confirmed_uniqueness_is_enforced_per_slot() {
        let store = MemoryStore::new();
        let (patient_id, slot_id) = seed(&store).await;
        let other_patient = Patient {
            id: PatientId::generate(),
            name: "Bea".to_string(),
            email: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let other_id = other_patient.id;
        store.insert_patient(other_patient).await.unwrap();

        let now = Utc::now();
        let expires = now + chrono::Duration::minutes(10);
        let first = store
            .insert_pending(slot_id, patient_id, expires, now)
            .await
            .unwrap();
        let second = store
            .insert_pending(slot_id, other_id, expires, now)
            .await
            .unwrap();

        store
            .transition_status(
                first.id,
                AppointmentStatus::Pending,
                AppointmentStatus::Confirmed,
                now,
            )
            .await
            .unwrap();

        let err = store
            .transition_status(
                second.id,
                AppointmentStatus::Pending,
                AppointmentStatus::Confirmed,
                now,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));

        // And the slot now rejects further pending inserts outright.
        let err = store
            .insert_pending(slot_id, other_id, expires, now)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));

        let confirmed = store.confirmed_appointment_for_slot(slot_id).await.unwrap();
        assert_eq!(confirmed.id, first.id);
    }

    #[tokio::test]
    async fn illegal_edges_are_refused() {
        let store = MemoryStore::new();
        let (patient_id, slot_id) = seed(&store).await;
        let now = Utc::now();

        let appt = store
            .insert_pending(slot_id, patient_id, now + chrono::Duration::minutes(10), now)
            .await
            .unwrap();
        store
            .transition_status(
                appt.id,
                AppointmentStatus::Pending,
                AppointmentStatus::Expired,
                now,
            )
            .await
            .unwrap();

        // Expired -> Confirmed is not an edge; the (id, from) match fails
        // first because the row is no longer Pending.
        let err = store
            .transition_status(
                appt.id,
                AppointmentStatus::Expired,
                AppointmentStatus::Confirmed,
                now,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn expired_pending_scan_honours_now() {
        let store = MemoryStore::new();
        let (patient_id, slot_id) = seed(&store).await;
        let now = Utc::now();
        let expires = now + chrono::Duration::milliseconds(50);

        let appt = store
            .insert_pending(slot_id, patient_id, expires, now)
            .await
            .unwrap();

        assert!(store.find_expired_pending(now).await.unwrap().is_empty());

        let later = expires + chrono::Duration::milliseconds(1);
        let expired = store.find_expired_pending(later).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, appt.id);
    }

    #[tokio::test]
    async fn events_get_monotonic_sequence_numbers() {
        let store = MemoryStore::new();
        let now = Utc::now();

        let first = store
            .append_event(EventKind::AppointmentCreated, None, serde_json::json!({}), now)
            .await
            .unwrap();
        let second = store
            .append_event(EventKind::AppointmentConfirmed, None, serde_json::json!({}), now)
            .await
            .unwrap();
        assert!(second.sequence > first.sequence);
        assert_eq!(store.event_count().unwrap(), 2);
    }

    #[tokio::test]
    async fn hydrated_read_is_coherent() {
        let store = MemoryStore::new();
        let (patient_id, slot_id) = seed(&store).await;
        let now = Utc::now();

        let appt = store
            .insert_pending(slot_id, patient_id, now + chrono::Duration::minutes(10), now)
            .await
            .unwrap();

        let detail = store.appointment_detail(appt.id).await.unwrap();
        assert_eq!(detail.appointment.id, appt.id);
        assert_eq!(detail.slot.id, slot_id);
        assert_eq!(detail.patient.id, patient_id);
        assert_eq!(detail.clinician.id, detail.slot.clinician_id);
    }

    #[tokio::test]
    async fn listings_are_created_at_descending() {
        let store = MemoryStore::new();
        let (patient_id, slot_id) = seed(&store).await;

        let base = Utc::now();
        let mut ids = Vec::new();
        for i in 0..3 {
            let now = base + chrono::Duration::seconds(i);
            let appt = store
                .insert_pending(slot_id, patient_id, now + chrono::Duration::minutes(10), now)
                .await
                .unwrap();
            // Multiple pending holds coexist; only Confirmed blocks.
            ids.push(appt.id);
        }

        let listed = store.list_by_patient(patient_id, 20, 0).await.unwrap();
        assert_eq!(listed.len(), 3);
        assert_eq!(listed[0].appointment.id, ids[2]);
        assert_eq!(listed[2].appointment.id, ids[0]);

        let paged = store.list_by_patient(patient_id, 1, 1).await.unwrap();
        assert_eq!(paged.len(), 1);
        assert_eq!(paged[0].appointment.id, ids[1]);

        let by_slot = store.list_by_slot(slot_id).await.unwrap();
        assert_eq!(by_slot.len(), 3);
    }

    #[tokio::test]
    async fn slot_interval_uniqueness() {
        let store = MemoryStore::new();
        let (_, slot_id) = seed(&store).await;
        let existing = store.slot(slot_id).await.unwrap();

        let dup = Slot {
            id: SlotId::generate(),
            ..existing
        };
        let err = store.insert_slot(dup).await.unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
    }
}
