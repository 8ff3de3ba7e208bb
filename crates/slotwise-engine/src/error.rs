//! Error types for reservation engine operations.

use slotwise_core::{AppointmentId, AppointmentStatus, PatientId, SlotId};

/// Result type alias for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Errors surfaced by the reservation engine.
///
/// Variants are grouped by how callers should react: validation errors
/// are not retryable, contention errors may be retried with backoff from
/// the client, lifecycle errors are terminal for the appointment, and
/// `Store` wraps transient infrastructure failures.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The named patient does not exist.
    #[error("patient not found: {0}")]
    PatientNotFound(PatientId),

    /// The named slot does not exist.
    #[error("slot not found: {0}")]
    SlotNotFound(SlotId),

    /// The slot exists but is not open for reservation.
    #[error("slot {0} is not open")]
    SlotNotOpen(SlotId),

    /// The slot already has a confirmed appointment.
    #[error("slot {0} already has a confirmed appointment")]
    SlotAlreadyBooked(SlotId),

    /// Another request currently holds the slot lock; the caller may retry.
    #[error("slot {0} is currently being booked, please retry")]
    SlotBeingBooked(SlotId),

    /// The named appointment does not exist.
    #[error("appointment not found: {0}")]
    AppointmentNotFound(AppointmentId),

    /// The appointment's hold has expired.
    #[error("appointment {0} is already expired")]
    AppointmentExpired(AppointmentId),

    /// The appointment is not in a status that permits the transition.
    #[error("invalid status transition for appointment {id} (status {status})")]
    InvalidStatusTransition {
        /// The appointment.
        id: AppointmentId,
        /// Its current status.
        status: AppointmentStatus,
    },

    /// A hydrated read produced mutually incoherent identifiers.
    ///
    /// Indicates a bug or operational corruption; logged loudly where
    /// detected.
    #[error("integrity violation: {message}")]
    Integrity {
        /// Description of the incoherence.
        message: String,
    },

    /// A store or lock-store operation failed for infrastructure reasons.
    #[error(transparent)]
    Store(#[from] slotwise_core::Error),
}

impl EngineError {
    /// Returns true when a retry from the caller may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::SlotBeingBooked(_) | Self::SlotAlreadyBooked(_) | Self::Store(_)
        )
    }
}
