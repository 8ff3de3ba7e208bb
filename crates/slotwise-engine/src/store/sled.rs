//! Durable store implementation backed by an embedded sled database.
//!
//! Layout (one tree per table, keys are raw UUID bytes unless noted):
//!
//! - `patients`, `clinicians`, `slots`, `appointments`: id -> JSON record
//! - `slot_intervals`: (clinician, start, end) -> slot id, the slot
//!   uniqueness rule, claimed with compare-and-swap
//! - `confirmed_by_slot`: slot id -> appointment id, the
//!   partial-uniqueness rule restricted to Confirmed rows
//! - `pending_expiry`: (`expires_at` millis BE, appointment id) ->
//!   appointment id, the expirer scan index
//! - `events`: sequence BE -> JSON record; `meta` holds the sequence
//!   counter
//!
//! The confirm/insert critical writes run as multi-tree transactions so
//! the appointment record, the confirmed index and the expiry index can
//! never disagree.
//!
//! sled's tree and transaction calls are synchronous (commits can fsync),
//! so every port method funnels its sled work through
//! `tokio::task::spawn_blocking` instead of running it on an async worker
//! thread. The `*_blocking` helpers must only be called from inside such
//! a block.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sled::transaction::{
    ConflictableTransactionError, TransactionError, Transactional, TransactionalTree,
};
use sled::{Db, IVec, Tree};
use tokio::task::spawn_blocking;

use slotwise_core::error::EntityKind;
use slotwise_core::{
    Appointment, AppointmentDetail, AppointmentId, AppointmentStatus, Clinician, ClinicianId,
    Error, EventKind, EventRecord, Patient, PatientId, Result, Slot, SlotId,
};

use super::ReservationStore;

const EVENT_SEQ_KEY: &[u8] = b"event_seq";

/// Durable reservation store over sled trees.
///
/// Cheap to clone; clones share the underlying database handle, which is
/// how each operation moves into its blocking task.
#[derive(Clone)]
pub struct SledStore {
    _db: Db,
    patients: Tree,
    clinicians: Tree,
    slots: Tree,
    slot_intervals: Tree,
    appointments: Tree,
    confirmed_by_slot: Tree,
    pending_expiry: Tree,
    events: Tree,
    meta: Tree,
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore").finish_non_exhaustive()
    }
}

fn storage_err(e: sled::Error) -> Error {
    Error::storage(format!("sled: {e}"))
}

fn ser_err(e: serde_json::Error) -> Error {
    Error::Serialization {
        message: e.to_string(),
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(ser_err)
}

fn decode<T: DeserializeOwned>(bytes: &IVec) -> Result<T> {
    serde_json::from_slice(bytes).map_err(ser_err)
}

fn millis_key(ts: DateTime<Utc>) -> [u8; 8] {
    u64::try_from(ts.timestamp_millis()).unwrap_or(0).to_be_bytes()
}

fn pending_expiry_key(expires_at: DateTime<Utc>, id: AppointmentId) -> [u8; 24] {
    let mut key = [0u8; 24];
    key[..8].copy_from_slice(&millis_key(expires_at));
    key[8..].copy_from_slice(id.as_uuid().as_bytes());
    key
}

fn interval_key(slot: &Slot) -> [u8; 32] {
    let mut key = [0u8; 32];
    key[..16].copy_from_slice(slot.clinician_id.as_uuid().as_bytes());
    key[16..24].copy_from_slice(&millis_key(slot.start_time));
    key[24..].copy_from_slice(&millis_key(slot.end_time));
    key
}

/// Shorthand for aborting a sled transaction with a domain error.
fn abort<T>(err: Error) -> std::result::Result<T, ConflictableTransactionError<Error>> {
    Err(ConflictableTransactionError::Abort(err))
}

fn unwrap_txn(err: TransactionError<Error>) -> Error {
    match err {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => storage_err(e),
    }
}

/// Runs a blocking sled operation on the blocking thread pool.
async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    spawn_blocking(f)
        .await
        .map_err(|e| Error::storage(format!("sled task failed: {e}")))?
}

impl SledStore {
    /// Opens (or creates) a store at the given path.
    ///
    /// The open itself (file locks, log recovery) blocks, so it runs on
    /// the blocking pool like every other operation.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the database or any tree cannot be
    /// opened.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        run_blocking(move || {
            let db = sled::Config::new()
                .path(path)
                .open()
                .map_err(storage_err)?;
            Self::from_db(db)
        })
        .await
    }

    fn from_db(db: Db) -> Result<Self> {
        let open = |name: &str| db.open_tree(name).map_err(storage_err);
        Ok(Self {
            patients: open("patients")?,
            clinicians: open("clinicians")?,
            slots: open("slots")?,
            slot_intervals: open("slot_intervals")?,
            appointments: open("appointments")?,
            confirmed_by_slot: open("confirmed_by_slot")?,
            pending_expiry: open("pending_expiry")?,
            events: open("events")?,
            meta: open("meta")?,
            _db: db,
        })
    }

    fn get_record<T: DeserializeOwned>(
        tree: &Tree,
        key: &[u8],
        kind: EntityKind,
        id: impl std::fmt::Display,
    ) -> Result<T> {
        tree.get(key)
            .map_err(storage_err)?
            .map_or_else(|| Err(Error::not_found(kind, id)), |bytes| decode(&bytes))
    }

    fn appointment_by_id(&self, id: AppointmentId) -> Result<Appointment> {
        Self::get_record(
            &self.appointments,
            id.as_uuid().as_bytes(),
            EntityKind::Appointment,
            id,
        )
    }

    fn hydrate(&self, appointment: Appointment) -> Result<AppointmentDetail> {
        let slot: Slot = self
            .slots
            .get(appointment.slot_id.as_uuid().as_bytes())
            .map_err(storage_err)?
            .map_or_else(
                || {
                    Err(Error::integrity(format!(
                        "appointment {} references missing slot {}",
                        appointment.id, appointment.slot_id
                    )))
                },
                |bytes| decode(&bytes),
            )?;
        let patient: Patient = self
            .patients
            .get(appointment.patient_id.as_uuid().as_bytes())
            .map_err(storage_err)?
            .map_or_else(
                || {
                    Err(Error::integrity(format!(
                        "appointment {} references missing patient {}",
                        appointment.id, appointment.patient_id
                    )))
                },
                |bytes| decode(&bytes),
            )?;
        let clinician: Clinician = self
            .clinicians
            .get(slot.clinician_id.as_uuid().as_bytes())
            .map_err(storage_err)?
            .map_or_else(
                || {
                    Err(Error::integrity(format!(
                        "slot {} references missing clinician {}",
                        slot.id, slot.clinician_id
                    )))
                },
                |bytes| decode(&bytes),
            )?;

        let detail = AppointmentDetail {
            appointment,
            slot,
            patient,
            clinician,
        };
        detail.verify_coherence()?;
        Ok(detail)
    }

    fn collect_details<F>(
        &self,
        filter: F,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<AppointmentDetail>>
    where
        F: Fn(&Appointment) -> bool,
    {
        let mut matched = Vec::new();
        for entry in self.appointments.iter() {
            let (_, bytes) = entry.map_err(storage_err)?;
            let appointment: Appointment = decode(&bytes)?;
            if filter(&appointment) {
                matched.push(appointment);
            }
        }
        matched.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });

        matched
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|a| self.hydrate(a))
            .collect()
    }

    fn next_sequence(&self) -> Result<u64> {
        let bumped = self
            .meta
            .update_and_fetch(EVENT_SEQ_KEY, |old| {
                let current = old
                    .and_then(|bytes| bytes.try_into().ok())
                    .map_or(0u64, u64::from_be_bytes);
                Some(current.saturating_add(1).to_be_bytes().to_vec())
            })
            .map_err(storage_err)?;
        bumped
            .and_then(|bytes| bytes.as_ref().try_into().ok())
            .map(u64::from_be_bytes)
            .ok_or_else(|| Error::storage("event sequence counter missing after bump"))
    }

    fn insert_pending_blocking(
        &self,
        slot_id: SlotId,
        patient_id: PatientId,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Appointment> {
        if !self
            .slots
            .contains_key(slot_id.as_uuid().as_bytes())
            .map_err(storage_err)?
        {
            return Err(Error::not_found(EntityKind::Slot, slot_id));
        }
        if !self
            .patients
            .contains_key(patient_id.as_uuid().as_bytes())
            .map_err(storage_err)?
        {
            return Err(Error::not_found(EntityKind::Patient, patient_id));
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

        let record = encode(&appointment)?;
        let expiry_key = pending_expiry_key(expires_at, appointment.id);
        let appt_key = *appointment.id.as_uuid().as_bytes();

        let trees: &[&Tree] = &[&self.appointments, &self.confirmed_by_slot, &self.pending_expiry];
        trees
            .transaction(|txn: &Vec<TransactionalTree>| {
                let (appts, confirmed, pending) = (&txn[0], &txn[1], &txn[2]);

                if confirmed.get(slot_id.as_uuid().as_bytes())?.is_some() {
                    return abort(Error::conflict(format!(
                        "slot {slot_id} already has a confirmed appointment"
                    )));
                }
                appts.insert(&appt_key[..], record.clone())?;
                pending.insert(&expiry_key[..], &appt_key[..])?;
                Ok(())
            })
            .map_err(unwrap_txn)?;

        Ok(appointment)
    }

    fn transition_status_blocking(
        &self,
        id: AppointmentId,
        from: AppointmentStatus,
        to: AppointmentStatus,
        now: DateTime<Utc>,
    ) -> Result<Appointment> {
        let appt_key = *id.as_uuid().as_bytes();

        let trees: &[&Tree] = &[&self.appointments, &self.confirmed_by_slot, &self.pending_expiry];
        let updated = trees
            .transaction(|txn: &Vec<TransactionalTree>| {
                let (appts, confirmed, pending) = (&txn[0], &txn[1], &txn[2]);

                let Some(bytes) = appts.get(appt_key)? else {
                    return abort(Error::not_found(EntityKind::Appointment, id));
                };
                let mut appointment: Appointment = match decode(&bytes) {
                    Ok(a) => a,
                    Err(e) => return abort(e),
                };

                if appointment.status != from {
                    // No row matched (id, from).
                    return abort(Error::not_found(EntityKind::Appointment, id));
                }
                if !from.can_transition_to(to) {
                    return abort(Error::InvalidInput(format!(
                        "illegal status transition {from} -> {to} for appointment {id}"
                    )));
                }

                if to == AppointmentStatus::Confirmed {
                    let slot_key = *appointment.slot_id.as_uuid().as_bytes();
                    if let Some(existing) = confirmed.get(slot_key)? {
                        if existing.as_ref() != appt_key.as_slice() {
                            return abort(Error::conflict(format!(
                                "slot {} already has a confirmed appointment",
                                appointment.slot_id
                            )));
                        }
                    }
                    confirmed.insert(&slot_key[..], &appt_key[..])?;
                }

                // Every legal edge leaves Pending, so the expiry index
                // entry is always retired here.
                if let Some(expires_at) = appointment.expires_at {
                    let expiry_key = pending_expiry_key(expires_at, id);
                    pending.remove(&expiry_key[..])?;
                }

                appointment.status = to;
                appointment.updated_at = now;
                let record = match encode(&appointment) {
                    Ok(r) => r,
                    Err(e) => return abort(e),
                };
                appts.insert(&appt_key[..], record)?;
                Ok(appointment)
            })
            .map_err(unwrap_txn)?;

        Ok(updated)
    }

    fn find_expired_pending_blocking(&self, now: DateTime<Utc>) -> Result<Vec<Appointment>> {
        // Keys are (expires_at millis, id); everything strictly below the
        // current millisecond has expired.
        let upper = {
            let mut key = [0u8; 24];
            key[..8].copy_from_slice(&millis_key(now));
            key
        };

        let mut expired = Vec::new();
        for entry in self.pending_expiry.range(..upper) {
            let (_, appt_id) = entry.map_err(storage_err)?;
            let id = AppointmentId::from_uuid(
                uuid::Uuid::from_slice(&appt_id)
                    .map_err(|e| Error::storage(format!("corrupt expiry index entry: {e}")))?,
            );
            match self.appointment_by_id(id) {
                Ok(a) if a.status == AppointmentStatus::Pending && a.is_expired_at(now) => {
                    expired.push(a);
                }
                Ok(_) => {}
                Err(e) if e.is_not_found(EntityKind::Appointment) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(expired)
    }

    fn insert_slot_blocking(&self, slot: Slot) -> Result<()> {
        slot.validate()?;
        if !self
            .clinicians
            .contains_key(slot.clinician_id.as_uuid().as_bytes())
            .map_err(storage_err)?
        {
            return Err(Error::not_found(EntityKind::Clinician, slot.clinician_id));
        }

        // Claim the (clinician, start, end) interval with compare-and-swap
        // so racing provisioners cannot double-register a window.
        let claim = self
            .slot_intervals
            .compare_and_swap(
                interval_key(&slot),
                None::<&[u8]>,
                Some(slot.id.as_uuid().as_bytes().as_slice()),
            )
            .map_err(storage_err)?;
        if claim.is_err() {
            return Err(Error::conflict(format!(
                "slot for clinician {} at [{}, {}) already exists",
                slot.clinician_id, slot.start_time, slot.end_time
            )));
        }

        self.slots
            .insert(slot.id.as_uuid().as_bytes(), encode(&slot)?)
            .map_err(storage_err)?;
        Ok(())
    }
}

#[async_trait]
impl ReservationStore for SledStore {
    async fn ping(&self) -> Result<()> {
        let store = self.clone();
        run_blocking(move || {
            store.meta.contains_key(b"__ping").map_err(storage_err)?;
            Ok(())
        })
        .await
    }

    async fn patient(&self, id: PatientId) -> Result<Patient> {
        let store = self.clone();
        run_blocking(move || {
            Self::get_record(
                &store.patients,
                id.as_uuid().as_bytes(),
                EntityKind::Patient,
                id,
            )
        })
        .await
    }

    async fn clinician(&self, id: ClinicianId) -> Result<Clinician> {
        let store = self.clone();
        run_blocking(move || {
            Self::get_record(
                &store.clinicians,
                id.as_uuid().as_bytes(),
                EntityKind::Clinician,
                id,
            )
        })
        .await
    }

    async fn slot(&self, id: SlotId) -> Result<Slot> {
        let store = self.clone();
        run_blocking(move || {
            Self::get_record(&store.slots, id.as_uuid().as_bytes(), EntityKind::Slot, id)
        })
        .await
    }

    async fn appointment(&self, id: AppointmentId) -> Result<Appointment> {
        let store = self.clone();
        run_blocking(move || store.appointment_by_id(id)).await
    }

    async fn confirmed_appointment_for_slot(&self, slot_id: SlotId) -> Result<Appointment> {
        let store = self.clone();
        run_blocking(move || {
            let Some(appt_id) = store
                .confirmed_by_slot
                .get(slot_id.as_uuid().as_bytes())
                .map_err(storage_err)?
            else {
                return Err(Error::not_found(EntityKind::Appointment, slot_id));
            };
            let id = AppointmentId::from_uuid(
                uuid::Uuid::from_slice(&appt_id)
                    .map_err(|e| Error::storage(format!("corrupt confirmed index entry: {e}")))?,
            );
            store.appointment_by_id(id)
        })
        .await
    }

    async fn insert_pending(
        &self,
        slot_id: SlotId,
        patient_id: PatientId,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Appointment> {
        let store = self.clone();
        run_blocking(move || store.insert_pending_blocking(slot_id, patient_id, expires_at, now))
            .await
    }

    async fn transition_status(
        &self,
        id: AppointmentId,
        from: AppointmentStatus,
        to: AppointmentStatus,
        now: DateTime<Utc>,
    ) -> Result<Appointment> {
        let store = self.clone();
        run_blocking(move || store.transition_status_blocking(id, from, to, now)).await
    }

    async fn find_expired_pending(&self, now: DateTime<Utc>) -> Result<Vec<Appointment>> {
        let store = self.clone();
        run_blocking(move || store.find_expired_pending_blocking(now)).await
    }

    async fn append_event(
        &self,
        kind: EventKind,
        appointment_id: Option<AppointmentId>,
        payload: Value,
        now: DateTime<Utc>,
    ) -> Result<EventRecord> {
        let store = self.clone();
        run_blocking(move || {
            let sequence = store.next_sequence()?;
            let record = EventRecord {
                sequence,
                kind,
                appointment_id,
                payload,
                created_at: now,
            };
            store
                .events
                .insert(sequence.to_be_bytes(), encode(&record)?)
                .map_err(storage_err)?;
            Ok(record)
        })
        .await
    }

    async fn events_for_appointment(&self, id: AppointmentId) -> Result<Vec<EventRecord>> {
        let store = self.clone();
        run_blocking(move || {
            let mut matched = Vec::new();
            for entry in store.events.iter() {
                let (_, bytes) = entry.map_err(storage_err)?;
                let record: EventRecord = decode(&bytes)?;
                if record.appointment_id == Some(id) {
                    matched.push(record);
                }
            }
            Ok(matched)
        })
        .await
    }

    async fn appointment_detail(&self, id: AppointmentId) -> Result<AppointmentDetail> {
        let store = self.clone();
        run_blocking(move || {
            let appointment = store.appointment_by_id(id)?;
            store.hydrate(appointment)
        })
        .await
    }

    async fn list_by_patient(
        &self,
        patient_id: PatientId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<AppointmentDetail>> {
        let store = self.clone();
        run_blocking(move || {
            store.collect_details(|a| a.patient_id == patient_id, limit, offset)
        })
        .await
    }

    async fn list_by_slot(&self, slot_id: SlotId) -> Result<Vec<AppointmentDetail>> {
        let store = self.clone();
        run_blocking(move || store.collect_details(|a| a.slot_id == slot_id, usize::MAX, 0)).await
    }

    async fn insert_patient(&self, patient: Patient) -> Result<()> {
        let store = self.clone();
        run_blocking(move || {
            store
                .patients
                .insert(patient.id.as_uuid().as_bytes(), encode(&patient)?)
                .map_err(storage_err)?;
            Ok(())
        })
        .await
    }

    async fn insert_clinician(&self, clinician: Clinician) -> Result<()> {
        let store = self.clone();
        run_blocking(move || {
            store
                .clinicians
                .insert(clinician.id.as_uuid().as_bytes(), encode(&clinician)?)
                .map_err(storage_err)?;
            Ok(())
        })
        .await
    }

    async fn insert_slot(&self, slot: Slot) -> Result<()> {
        let store = self.clone();
        run_blocking(move || store.insert_slot_blocking(slot)).await
    }
}
