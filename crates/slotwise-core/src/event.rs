//! Audit event vocabulary and record shape.
//!
//! Events are appended after the state change commits; the store assigns
//! sequence numbers monotonically by arrival. The event log is best-effort:
//! append failures never fail the business operation, so the appointment
//! table remains the system of record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::id::{AppointmentId, PatientId, SlotId};

/// The closed vocabulary of audit events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// A pending appointment was created.
    #[serde(rename = "APPOINTMENT_CREATED")]
    AppointmentCreated,
    /// A pending appointment was confirmed.
    #[serde(rename = "APPOINTMENT_CONFIRMED")]
    AppointmentConfirmed,
    /// A pending appointment expired.
    #[serde(rename = "APPOINTMENT_EXPIRED")]
    AppointmentExpired,
}

impl EventKind {
    /// Returns the wire name of this event kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AppointmentCreated => "APPOINTMENT_CREATED",
            Self::AppointmentConfirmed => "APPOINTMENT_CONFIRMED",
            Self::AppointmentExpired => "APPOINTMENT_EXPIRED",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reason tag carried by `APPOINTMENT_EXPIRED` payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryReason {
    /// The background expirer reclaimed the hold.
    Worker,
    /// A confirm call found the hold already past its expiry.
    ConfirmAfterExpiry,
}

impl ExpiryReason {
    /// Returns the wire name of this reason.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Worker => "worker",
            Self::ConfirmAfterExpiry => "confirm_after_expiry",
        }
    }
}

/// An append-only audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Monotonically increasing sequence number, assigned by the store.
    pub sequence: u64,
    /// Event kind.
    pub kind: EventKind,
    /// The appointment this event concerns, if any.
    pub appointment_id: Option<AppointmentId>,
    /// Opaque structured payload.
    pub payload: Value,
    /// When the event was recorded.
    pub created_at: DateTime<Utc>,
}

/// Builds the payload for `APPOINTMENT_CREATED`.
#[must_use]
pub fn created_payload(
    slot_id: SlotId,
    patient_id: PatientId,
    expires_at: DateTime<Utc>,
) -> Value {
    serde_json::json!({
        "slot_id": slot_id.to_string(),
        "patient_id": patient_id.to_string(),
        "expires_at": expires_at,
    })
}

/// Builds the (empty) payload for `APPOINTMENT_CONFIRMED`.
#[must_use]
pub fn confirmed_payload() -> Value {
    serde_json::json!({})
}

/// Builds the payload for `APPOINTMENT_EXPIRED`.
#[must_use]
pub fn expired_payload(reason: ExpiryReason) -> Value {
    serde_json::json!({ "reason": reason.as_str() })
}
