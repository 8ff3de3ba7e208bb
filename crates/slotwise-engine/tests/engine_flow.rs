//! End-to-end reservation lifecycle tests over the in-memory backends.
//!
//! These drive the engine the way the gateway does, with a manual clock
//! so expiry boundaries are crossed deterministically instead of by
//! sleeping.

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;

use slotwise_core::{
    AppointmentStatus, Clinician, ClinicianId, Clock, EventKind, ManualClock, Patient, PatientId,
    Slot, SlotId, SlotStatus,
};
use slotwise_engine::lock::{MemoryLocker, SlotLockManager};
use slotwise_engine::store::{MemoryStore, ReservationStore};
use slotwise_engine::{EngineError, ReservationEngine};

const HOLD_TTL_MINUTES: i64 = 10;

struct Fixture {
    engine: ReservationEngine,
    store: Arc<MemoryStore>,
    clock: Arc<ManualClock>,
    slot_id: SlotId,
    patient_id: PatientId,
    other_patient_id: PatientId,
}

async fn fixture() -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::deterministic());
    let now = clock.now();

    let clinician = Clinician {
        id: ClinicianId::generate(),
        name: "Dr. Varga".to_string(),
        specialty: Some("dermatology".to_string()),
        created_at: now,
        updated_at: now,
    };
    let patient = Patient {
        id: PatientId::generate(),
        name: "Asha".to_string(),
        email: Some("asha@example.com".to_string()),
        created_at: now,
        updated_at: now,
    };
    let other_patient = Patient {
        id: PatientId::generate(),
        name: "Bruno".to_string(),
        email: None,
        created_at: now,
        updated_at: now,
    };
    let slot = Slot {
        id: SlotId::generate(),
        clinician_id: clinician.id,
        start_time: now + ChronoDuration::hours(24),
        end_time: now + ChronoDuration::hours(25),
        status: SlotStatus::Open,
        capacity: 1,
        created_at: now,
        updated_at: now,
    };

    let slot_id = slot.id;
    let patient_id = patient.id;
    let other_patient_id = other_patient.id;

    store.insert_clinician(clinician).await.unwrap();
    store.insert_patient(patient).await.unwrap();
    store.insert_patient(other_patient).await.unwrap();
    store.insert_slot(slot).await.unwrap();

    let locks = SlotLockManager::new(Arc::new(MemoryLocker::new()), Duration::from_secs(5));
    let engine = ReservationEngine::new(
        store.clone() as Arc<dyn ReservationStore>,
        locks,
        clock.clone(),
        ChronoDuration::minutes(HOLD_TTL_MINUTES),
    );

    Fixture {
        engine,
        store,
        clock,
        slot_id,
        patient_id,
        other_patient_id,
    }
}

#[tokio::test]
async fn happy_path_create_confirm_read() {
    let f = fixture().await;
    let created_at = f.clock.now();

    let appt = f.engine.create(f.slot_id, f.patient_id).await.unwrap();
    assert_eq!(appt.status, AppointmentStatus::Pending);
    assert_eq!(appt.slot_id, f.slot_id);
    assert_eq!(appt.patient_id, f.patient_id);
    assert_eq!(
        appt.expires_at,
        Some(created_at + ChronoDuration::minutes(HOLD_TTL_MINUTES))
    );

    let confirmed = f.engine.confirm(appt.id).await.unwrap();
    assert_eq!(confirmed.status, AppointmentStatus::Confirmed);

    let detail = f.engine.appointment_detail(appt.id).await.unwrap();
    assert_eq!(detail.appointment.status, AppointmentStatus::Confirmed);
    assert_eq!(detail.slot.id, f.slot_id);
    assert_eq!(detail.patient.id, f.patient_id);
    assert_eq!(detail.clinician.id, detail.slot.clinician_id);

    let events = f.store.events_for_appointment(appt.id).await.unwrap();
    let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![EventKind::AppointmentCreated, EventKind::AppointmentConfirmed]
    );
    assert_eq!(
        events[0].payload["patient_id"],
        f.patient_id.to_string()
    );
}

#[tokio::test]
async fn confirmed_slot_rejects_new_creates() {
    let f = fixture().await;

    let appt = f.engine.create(f.slot_id, f.patient_id).await.unwrap();
    f.engine.confirm(appt.id).await.unwrap();

    let err = f
        .engine
        .create(f.slot_id, f.other_patient_id)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::SlotAlreadyBooked(s) if s == f.slot_id));
}

#[tokio::test]
async fn create_validation_failures() {
    let f = fixture().await;

    let err = f
        .engine
        .create(f.slot_id, PatientId::generate())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::PatientNotFound(_)));

    let err = f
        .engine
        .create(SlotId::generate(), f.patient_id)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::SlotNotFound(_)));

    let now = f.clock.now();
    let blocked = Slot {
        id: SlotId::generate(),
        clinician_id: f
            .store
            .slot(f.slot_id)
            .await
            .unwrap()
            .clinician_id,
        start_time: now + ChronoDuration::hours(30),
        end_time: now + ChronoDuration::hours(31),
        status: SlotStatus::Blocked,
        capacity: 1,
        created_at: now,
        updated_at: now,
    };
    let blocked_id = blocked.id;
    f.store.insert_slot(blocked).await.unwrap();

    let err = f.engine.create(blocked_id, f.patient_id).await.unwrap_err();
    assert!(matches!(err, EngineError::SlotNotOpen(s) if s == blocked_id));
}

#[tokio::test]
async fn locked_slot_reports_being_booked() {
    let f = fixture().await;

    // Park a foreign holder on the slot lock.
    let locker = Arc::new(MemoryLocker::new());
    let locks = SlotLockManager::new(locker.clone(), Duration::from_secs(30));
    let engine = ReservationEngine::new(
        f.store.clone() as Arc<dyn ReservationStore>,
        locks,
        f.clock.clone(),
        ChronoDuration::minutes(HOLD_TTL_MINUTES),
    );

    use slotwise_engine::lock::SlotLocker;
    let held = locker
        .try_acquire(f.slot_id, Duration::from_secs(30))
        .await
        .unwrap();

    let err = engine.create(f.slot_id, f.patient_id).await.unwrap_err();
    assert!(matches!(err, EngineError::SlotBeingBooked(s) if s == f.slot_id));

    locker.release(&held).await.unwrap();
    engine.create(f.slot_id, f.patient_id).await.unwrap();
}

#[tokio::test]
async fn confirm_after_expiry_reclaims_the_hold() {
    let f = fixture().await;

    let appt = f.engine.create(f.slot_id, f.patient_id).await.unwrap();
    f.clock
        .advance(ChronoDuration::minutes(HOLD_TTL_MINUTES + 1));

    let err = f.engine.confirm(appt.id).await.unwrap_err();
    assert!(matches!(err, EngineError::AppointmentExpired(id) if id == appt.id));

    let stored = f.store.appointment(appt.id).await.unwrap();
    assert_eq!(stored.status, AppointmentStatus::Expired);

    let events = f.store.events_for_appointment(appt.id).await.unwrap();
    let expiry_events: Vec<_> = events
        .iter()
        .filter(|e| e.kind == EventKind::AppointmentExpired)
        .collect();
    assert_eq!(expiry_events.len(), 1);
    assert_eq!(expiry_events[0].payload["reason"], "confirm_after_expiry");

    // A second confirm short-circuits on the terminal status.
    let err = f.engine.confirm(appt.id).await.unwrap_err();
    assert!(matches!(err, EngineError::AppointmentExpired(_)));
}

#[tokio::test]
async fn worker_expiry_reclaims_the_slot() {
    let f = fixture().await;

    let appt = f.engine.create(f.slot_id, f.patient_id).await.unwrap();
    f.clock
        .advance(ChronoDuration::minutes(HOLD_TTL_MINUTES + 1));

    let expired = f.engine.expire_pending().await.unwrap();
    assert_eq!(expired, 1);

    let stored = f.store.appointment(appt.id).await.unwrap();
    assert_eq!(stored.status, AppointmentStatus::Expired);

    let events = f.store.events_for_appointment(appt.id).await.unwrap();
    let expiry_events: Vec<_> = events
        .iter()
        .filter(|e| e.kind == EventKind::AppointmentExpired)
        .collect();
    assert_eq!(expiry_events.len(), 1);
    assert_eq!(expiry_events[0].payload["reason"], "worker");

    // The slot is reclaimable now.
    let second = f
        .engine
        .create(f.slot_id, f.other_patient_id)
        .await
        .unwrap();
    assert_eq!(second.status, AppointmentStatus::Pending);

    // A rerun finds nothing left to do.
    assert_eq!(f.engine.expire_pending().await.unwrap(), 0);
}

#[tokio::test]
async fn worker_and_confirm_race_has_one_winner() {
    let f = fixture().await;

    let appt = f.engine.create(f.slot_id, f.patient_id).await.unwrap();
    f.clock
        .advance(ChronoDuration::minutes(HOLD_TTL_MINUTES + 1));

    let worker_engine = f.engine.clone();
    let confirm_engine = f.engine.clone();
    let (worker_result, confirm_result) = tokio::join!(
        async move { worker_engine.expire_pending().await },
        async move { confirm_engine.confirm(appt.id).await },
    );

    // Whoever lost the conditional update tolerated it; the caller of
    // confirm always observes expiry.
    worker_result.unwrap();
    assert!(matches!(
        confirm_result.unwrap_err(),
        EngineError::AppointmentExpired(_)
    ));

    let stored = f.store.appointment(appt.id).await.unwrap();
    assert_eq!(stored.status, AppointmentStatus::Expired);
}

#[tokio::test]
async fn confirm_of_confirmed_is_invalid_transition() {
    let f = fixture().await;

    let appt = f.engine.create(f.slot_id, f.patient_id).await.unwrap();
    f.engine.confirm(appt.id).await.unwrap();

    let err = f.engine.confirm(appt.id).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::InvalidStatusTransition {
            status: AppointmentStatus::Confirmed,
            ..
        }
    ));
}

#[tokio::test]
async fn second_pending_loses_confirm_to_the_first() {
    let f = fixture().await;

    // Two pendings for the same slot are permitted.
    let first = f.engine.create(f.slot_id, f.patient_id).await.unwrap();
    let second = f
        .engine
        .create(f.slot_id, f.other_patient_id)
        .await
        .unwrap();

    f.engine.confirm(first.id).await.unwrap();

    let err = f.engine.confirm(second.id).await.unwrap_err();
    assert!(matches!(err, EngineError::SlotAlreadyBooked(s) if s == f.slot_id));

    let confirmed = f
        .store
        .confirmed_appointment_for_slot(f.slot_id)
        .await
        .unwrap();
    assert_eq!(confirmed.id, first.id);
}

#[tokio::test]
async fn listings_come_back_newest_first() {
    let f = fixture().await;

    let first = f.engine.create(f.slot_id, f.patient_id).await.unwrap();
    f.clock.advance(ChronoDuration::seconds(1));
    let second = f.engine.create(f.slot_id, f.patient_id).await.unwrap();

    let listed = f.engine.list_by_patient(f.patient_id, 20, 0).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].appointment.id, second.id);
    assert_eq!(listed[1].appointment.id, first.id);

    let by_slot = f.engine.list_by_slot(f.slot_id).await.unwrap();
    assert_eq!(by_slot.len(), 2);

    // The clamp keeps oversized pages bounded.
    let clamped = f
        .engine
        .list_by_patient(f.patient_id, 10_000, 0)
        .await
        .unwrap();
    assert_eq!(clamped.len(), 2);
}

#[tokio::test]
async fn unknown_appointment_reads_fail_cleanly() {
    let f = fixture().await;
    let missing = slotwise_core::AppointmentId::generate();

    assert!(matches!(
        f.engine.confirm(missing).await.unwrap_err(),
        EngineError::AppointmentNotFound(_)
    ));
    assert!(matches!(
        f.engine.appointment_detail(missing).await.unwrap_err(),
        EngineError::AppointmentNotFound(_)
    ));
}
