use ulid::Ulid;

use crate::model::{EntityKind, Version};
use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Malformed input. Never retried.
    Validation(String),
    /// A request named a room, user or equipment item that does not exist.
    InvalidReference { kind: EntityKind, id: Ulid },
    /// The room already has a confirmed reservation overlapping the window.
    Conflict { room_id: Ulid, reservation_id: Ulid },
    /// Lost-update race: the record moved past the version the writer read.
    VersionConflict {
        kind: EntityKind,
        id: Ulid,
        expected: Version,
    },
    NotFound { kind: EntityKind, id: Ulid },
    HasReservations(Ulid),
    LimitExceeded(&'static str),
    StoreUnavailable(String),
}

impl EngineError {
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            EngineError::Validation(_)
                | EngineError::InvalidReference { .. }
                | EngineError::LimitExceeded(_)
        )
    }

    /// Only a version conflict is worth reloading and trying again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::VersionConflict { .. })
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "validation failed: {msg}"),
            EngineError::InvalidReference { kind, id } => {
                write!(f, "referenced {kind} does not exist: {id}")
            }
            EngineError::Conflict {
                room_id,
                reservation_id,
            } => write!(
                f,
                "room {room_id} unavailable: conflicts with reservation {reservation_id}"
            ),
            EngineError::VersionConflict { kind, id, expected } => write!(
                f,
                "version conflict on {kind} {id}: expected version {expected} was superseded"
            ),
            EngineError::NotFound { kind, id } => write!(f, "{kind} not found: {id}"),
            EngineError::HasReservations(id) => {
                write!(f, "cannot delete user {id}: reservations still reference it")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::StoreUnavailable(e) => write!(f, "store unavailable: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { kind, id } => EngineError::NotFound { kind, id },
            StoreError::VersionConflict { kind, id, expected, .. } => {
                EngineError::VersionConflict { kind, id, expected }
            }
            StoreError::MissingReference { kind, id } => {
                EngineError::InvalidReference { kind, id }
            }
            StoreError::StillReferenced { id, .. } => EngineError::HasReservations(id),
            StoreError::Unavailable(msg) => {
                metrics::counter!(crate::observability::STORE_UNAVAILABLE_TOTAL).increment(1);
                EngineError::StoreUnavailable(msg)
            }
        }
    }
}
