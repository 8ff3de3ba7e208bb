//! Strongly-typed identifiers for slotwise entities.
//!
//! All identifiers are:
//! - **Strongly typed**: Prevents mixing up different ID types at compile time
//! - **Opaque 128-bit values**: UUIDv4 under the hood, no coordination
//!   required for generation
//!
//! # Example
//!
//! ```rust
//! use slotwise_core::id::{PatientId, SlotId};
//!
//! let patient = PatientId::generate();
//! let slot = SlotId::generate();
//!
//! // IDs are different types - this won't compile:
//! // let wrong: PatientId = slot;
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

macro_rules! entity_id {
    ($(#[$doc:meta])* $name:ident, $label:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generates a new unique identifier.
            #[must_use]
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an identifier from a raw UUID.
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                Uuid::parse_str(s).map(Self).map_err(|e| Error::InvalidId {
                    message: format!(concat!("invalid ", $label, " ID '{}': {}"), s, e),
                })
            }
        }
    };
}

entity_id!(
    /// A unique identifier for a patient.
    PatientId,
    "patient"
);

entity_id!(
    /// A unique identifier for a clinician.
    ClinicianId,
    "clinician"
);

entity_id!(
    /// A unique identifier for an appointment slot.
    ///
    /// Slots are the atomic unit of reservation; the per-slot lock and the
    /// confirmed-appointment uniqueness rule are both keyed by this ID.
    SlotId,
    "slot"
);

entity_id!(
    /// A unique identifier for an appointment.
    AppointmentId,
    "appointment"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_id_roundtrip() {
        let id = SlotId::generate();
        let s = id.to_string();
        let parsed: SlotId = s.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn appointment_id_roundtrip() {
        let id = AppointmentId::generate();
        let parsed: AppointmentId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn ids_are_unique() {
        let id1 = PatientId::generate();
        let id2 = PatientId::generate();
        assert_ne!(id1, id2);
    }

    #[test]
    fn invalid_id_returns_error() {
        let result: Result<PatientId> = "not-a-valid-uuid".parse();
        assert!(matches!(result, Err(Error::InvalidId { .. })));
    }
}
