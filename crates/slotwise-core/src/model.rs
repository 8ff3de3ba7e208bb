//! Entity model and the appointment lifecycle state machine.
//!
//! Appointments are owned by the reservation engine; patients, clinicians
//! and slots are read-only from the engine's perspective (written by
//! provisioning tooling). Event records live in [`crate::event`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::id::{AppointmentId, ClinicianId, PatientId, SlotId};

/// Lifecycle status of an appointment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    /// A tentative hold that auto-releases on expiry.
    Pending,
    /// Terminal success state; the slot is consumed.
    Confirmed,
    /// Terminal state; reserved, not reached by any engine path.
    Cancelled,
    /// Terminal state reached from Pending when the hold's TTL elapses.
    Expired,
}

impl AppointmentStatus {
    /// Returns true when no further transitions are allowed.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Returns whether the `self -> to` edge exists in the state machine.
    ///
    /// The only legal edges are Pending -> Confirmed, Pending -> Expired,
    /// and Pending -> Cancelled. Status is never downgraded.
    #[must_use]
    pub const fn can_transition_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (
                Self::Pending,
                Self::Confirmed | Self::Expired | Self::Cancelled
            )
        )
    }

    /// Returns the lowercase wire name for this status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }
}

impl std::fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Availability status of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotStatus {
    /// The slot accepts new reservations.
    Open,
    /// The slot is administratively blocked.
    Blocked,
    /// The slot has been soft-deleted.
    Deleted,
}

impl SlotStatus {
    /// Returns the lowercase wire name for this status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Blocked => "blocked",
            Self::Deleted => "deleted",
        }
    }
}

/// A patient who can hold reservations.
///
/// Immutable after creation from the engine's point of view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patient {
    /// Stable identifier.
    pub id: PatientId,
    /// Display name.
    pub name: String,
    /// Optional contact string.
    pub email: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// A clinician who owns appointment slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clinician {
    /// Stable identifier.
    pub id: ClinicianId,
    /// Display name.
    pub name: String,
    /// Optional specialty.
    pub specialty: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// A bounded time window belonging to a clinician; the atomic unit of
/// reservation.
///
/// The interval is half-open `[start_time, end_time)` with
/// `end_time > start_time`. Slots are unique per
/// `(clinician, start_time, end_time)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    /// Stable identifier.
    pub id: SlotId,
    /// Owning clinician.
    pub clinician_id: ClinicianId,
    /// Inclusive start of the window.
    pub start_time: DateTime<Utc>,
    /// Exclusive end of the window.
    pub end_time: DateTime<Utc>,
    /// Availability status.
    pub status: SlotStatus,
    /// Schema allows capacity > 1 but the confirmed-uniqueness invariant
    /// only covers capacity = 1.
    pub capacity: u32,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Slot {
    /// Validates the slot's interval and capacity.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` when `end_time <= start_time` or
    /// `capacity == 0`.
    pub fn validate(&self) -> Result<()> {
        if self.end_time <= self.start_time {
            return Err(Error::InvalidInput(format!(
                "slot {}: end_time must be after start_time",
                self.id
            )));
        }
        if self.capacity == 0 {
            return Err(Error::InvalidInput(format!(
                "slot {}: capacity must be at least 1",
                self.id
            )));
        }
        Ok(())
    }
}

/// A reservation of a slot by a patient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    /// Stable identifier.
    pub id: AppointmentId,
    /// The reserved slot.
    pub slot_id: SlotId,
    /// The holding patient.
    pub patient_id: PatientId,
    /// Lifecycle status.
    pub status: AppointmentStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp; bumped on every status transition.
    pub updated_at: DateTime<Utc>,
    /// When the pending hold auto-releases. Must be strictly after
    /// `created_at` whenever present. Retained on confirm.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Appointment {
    /// Returns true when the hold has expired as of `now`.
    ///
    /// Terminal rows never report as expired here; this is only meaningful
    /// for Pending appointments with an expiry stamp.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|e| e < now)
    }

    /// Validates the expiry stamp against the creation timestamp.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` when `expires_at <= created_at`.
    pub fn validate_expiry(&self) -> Result<()> {
        if let Some(expires_at) = self.expires_at {
            if expires_at <= self.created_at {
                return Err(Error::InvalidInput(format!(
                    "appointment {}: expires_at must be after created_at",
                    self.id
                )));
            }
        }
        Ok(())
    }
}

/// Hydrated view of an appointment together with its slot, patient, and
/// the slot's owning clinician.
///
/// Produced by a single store read; the store verifies id coherence
/// (`slot.id == appointment.slot_id`, etc.) before returning one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentDetail {
    /// The appointment itself.
    pub appointment: Appointment,
    /// The reserved slot.
    pub slot: Slot,
    /// The holding patient.
    pub patient: Patient,
    /// The slot's owning clinician.
    pub clinician: Clinician,
}

impl AppointmentDetail {
    /// Verifies that the joined entities reference each other coherently.
    ///
    /// # Errors
    ///
    /// Returns `Error::IntegrityViolation` naming the first broken link.
    /// A broken link indicates a bug or operational corruption rather
    /// than a caller mistake.
    pub fn verify_coherence(&self) -> Result<()> {
        if self.slot.id != self.appointment.slot_id {
            return Err(Error::integrity(format!(
                "appointment {} references slot {} but joined slot is {}",
                self.appointment.id, self.appointment.slot_id, self.slot.id
            )));
        }
        if self.patient.id != self.appointment.patient_id {
            return Err(Error::integrity(format!(
                "appointment {} references patient {} but joined patient is {}",
                self.appointment.id, self.appointment.patient_id, self.patient.id
            )));
        }
        if self.clinician.id != self.slot.clinician_id {
            return Err(Error::integrity(format!(
                "slot {} references clinician {} but joined clinician is {}",
                self.slot.id, self.slot.clinician_id, self.clinician.id
            )));
        }
        Ok(())
    }
}
