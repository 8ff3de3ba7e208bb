//! Background worker that reclaims abandoned pending holds.
//!
//! Runs `expire_pending` on a fixed interval, each run bounded by a
//! per-run deadline so a slow scan cannot pile up behind the ticker. One
//! running instance is sufficient; multiple are safe because each
//! attempted transition uses the conditional Pending -> Expired
//! primitive, so duplicates collapse. No leader election is required.

use std::time::Duration;

use tokio::sync::watch;
use tracing::Instrument;

use slotwise_core::observability::expirer_span;

use crate::engine::ReservationEngine;

/// Default bound on a single expiry run.
pub const DEFAULT_RUN_DEADLINE: Duration = Duration::from_secs(20);

/// Periodic expiry worker.
#[derive(Debug, Clone)]
pub struct ExpiryWorker {
    engine: ReservationEngine,
    interval: Duration,
    run_deadline: Duration,
}

impl ExpiryWorker {
    /// Creates a worker that ticks at `interval`.
    #[must_use]
    pub fn new(engine: ReservationEngine, interval: Duration) -> Self {
        Self {
            engine,
            interval,
            run_deadline: DEFAULT_RUN_DEADLINE,
        }
    }

    /// Overrides the per-run deadline.
    #[must_use]
    pub const fn with_run_deadline(mut self, deadline: Duration) -> Self {
        self.run_deadline = deadline;
        self
    }

    /// Runs until `shutdown` flips to true.
    ///
    /// Performs one run immediately at startup, then once per interval.
    /// The current run is allowed to finish (within its deadline) before
    /// shutdown completes.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut run = 0u64;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    run += 1;
                    self.run_once(run).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("expiry worker stopping");
                        return;
                    }
                }
            }
        }
    }

    /// Executes a single bounded expiry run.
    pub async fn run_once(&self, run: u64) {
        let span = expirer_span(run);
        async {
            let started = std::time::Instant::now();
            match tokio::time::timeout(self.run_deadline, self.engine.expire_pending()).await {
                Ok(Ok(expired)) => {
                    tracing::info!(expired, elapsed_ms = %started.elapsed().as_millis(),
                        "expiry run complete");
                }
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "expiry run failed");
                }
                Err(_) => {
                    tracing::warn!(deadline_secs = self.run_deadline.as_secs(),
                        "expiry run exceeded its deadline");
                }
            }
        }
        .instrument(span)
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Duration as ChronoDuration;

    use slotwise_core::{
        Appointment, AppointmentStatus, Clinician, ClinicianId, Clock, ManualClock, Patient,
        PatientId, Slot, SlotId, SlotStatus,
    };

    use crate::lock::{MemoryLocker, SlotLockManager};
    use crate::store::{MemoryStore, ReservationStore};

    async fn engine_with_clock() -> (ReservationEngine, Arc<ManualClock>, SlotId, PatientId) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::deterministic());
        let now = clock.now();

        let clinician = Clinician {
            id: ClinicianId::generate(),
            name: "Dr. Ngo".to_string(),
            specialty: None,
            created_at: now,
            updated_at: now,
        };
        let patient = Patient {
            id: PatientId::generate(),
            name: "Remy".to_string(),
            email: None,
            created_at: now,
            updated_at: now,
        };
        let slot = Slot {
            id: SlotId::generate(),
            clinician_id: clinician.id,
            start_time: now + ChronoDuration::hours(1),
            end_time: now + ChronoDuration::hours(2),
            status: SlotStatus::Open,
            capacity: 1,
            created_at: now,
            updated_at: now,
        };
        let (slot_id, patient_id) = (slot.id, patient.id);
        store.insert_clinician(clinician).await.unwrap();
        store.insert_patient(patient).await.unwrap();
        store.insert_slot(slot).await.unwrap();

        let locks = SlotLockManager::new(Arc::new(MemoryLocker::new()), Duration::from_secs(5));
        let engine = ReservationEngine::new(
            store,
            locks,
            clock.clone(),
            ChronoDuration::minutes(10),
        );
        (engine, clock, slot_id, patient_id)
    }

    async fn status_of(engine: &ReservationEngine, appt: &Appointment) -> AppointmentStatus {
        engine.store().appointment(appt.id).await.unwrap().status
    }

    #[tokio::test]
    async fn run_once_expires_lapsed_holds() {
        let (engine, clock, slot_id, patient_id) = engine_with_clock().await;
        let appt = engine.create(slot_id, patient_id).await.unwrap();

        let worker = ExpiryWorker::new(engine.clone(), Duration::from_secs(60));

        // Before the hold lapses, the run is a no-op.
        worker.run_once(1).await;
        assert_eq!(status_of(&engine, &appt).await, AppointmentStatus::Pending);

        clock.advance(ChronoDuration::minutes(11));
        worker.run_once(2).await;
        assert_eq!(status_of(&engine, &appt).await, AppointmentStatus::Expired);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown_signal() {
        let (engine, _clock, _slot, _patient) = engine_with_clock().await;
        let worker = ExpiryWorker::new(engine, Duration::from_millis(10));

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(worker.run(rx));

        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("worker should stop promptly")
            .unwrap();
    }
}
