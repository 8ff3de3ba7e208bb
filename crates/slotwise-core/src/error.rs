//! Error types and result aliases shared across slotwise components.
//!
//! Errors are structured for programmatic handling and include context for
//! debugging. Component-specific errors (engine, API) wrap or map these.

/// The result type used throughout the core crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The kind of entity an operation failed to find.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    /// A patient record.
    Patient,
    /// A clinician record.
    Clinician,
    /// An appointment slot.
    Slot,
    /// An appointment.
    Appointment,
}

impl EntityKind {
    /// Returns the lowercase name used in messages and wire codes.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Patient => "patient",
            Self::Clinician => "clinician",
            Self::Slot => "slot",
            Self::Appointment => "appointment",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur in core slotwise operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An invalid identifier was provided.
    #[error("invalid identifier: {message}")]
    InvalidId {
        /// Description of what made the ID invalid.
        message: String,
    },

    /// The requested entity was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// The type of entity that was not found.
        kind: EntityKind,
        /// The identifier that was looked up.
        id: String,
    },

    /// A uniqueness constraint rejected the write.
    #[error("conflict: {message}")]
    Conflict {
        /// Description of the violated constraint.
        message: String,
    },

    /// A hydrated read produced mutually incoherent identifiers.
    ///
    /// Indicates a bug or operational corruption; must be logged loudly.
    #[error("integrity violation: {message}")]
    IntegrityViolation {
        /// Description of the incoherence.
        message: String,
    },

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// An internal error occurred that should not happen in normal operation.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl Error {
    /// Creates a new storage error with the given message.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a new not-found error for the given entity kind.
    #[must_use]
    pub fn not_found(kind: EntityKind, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Creates a new conflict error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates a new integrity-violation error.
    #[must_use]
    pub fn integrity(message: impl Into<String>) -> Self {
        Self::IntegrityViolation {
            message: message.into(),
        }
    }

    /// Returns true when this error is a not-found for the given kind.
    #[must_use]
    pub fn is_not_found(&self, kind: EntityKind) -> bool {
        matches!(self, Self::NotFound { kind: k, .. } if *k == kind)
    }
}
