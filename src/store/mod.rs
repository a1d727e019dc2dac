//! Entity store contract the engine reads and writes through.
//!
//! The store owns durability and referential policy. The engine only ever
//! asks for single-record conditional writes, so a failed call leaves the
//! stored state exactly as it was.

mod durable;
mod memory;

pub use durable::WalStore;
pub use memory::InMemoryStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::model::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    NotFound {
        kind: EntityKind,
        id: Ulid,
    },
    /// Conditional write rejected: stored version is `actual`, not `expected`.
    VersionConflict {
        kind: EntityKind,
        id: Ulid,
        expected: Version,
        actual: Version,
    },
    /// Insert or update pointing at a record that does not exist.
    MissingReference {
        kind: EntityKind,
        id: Ulid,
    },
    /// Delete refused because other records still point at this one.
    StillReferenced {
        kind: EntityKind,
        id: Ulid,
    },
    /// Infrastructure failure (I/O, timeout, poisoned lock).
    Unavailable(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound { kind, id } => write!(f, "{kind} not found: {id}"),
            StoreError::VersionConflict {
                kind,
                id,
                expected,
                actual,
            } => write!(
                f,
                "{kind} {id} is at version {actual}, write expected {expected}"
            ),
            StoreError::MissingReference { kind, id } => {
                write!(f, "referenced {kind} missing: {id}")
            }
            StoreError::StillReferenced { kind, id } => {
                write!(f, "{kind} {id} is still referenced")
            }
            StoreError::Unavailable(e) => write!(f, "unavailable: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Conjunctive reservation filter. `None` fields match everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReservationQuery {
    pub room_id: Option<Ulid>,
    pub user_id: Option<Ulid>,
    pub status: Option<ReservationStatus>,
    /// Keep reservations whose window overlaps this one.
    pub window: Option<Window>,
}

impl ReservationQuery {
    pub fn matches(&self, r: &Reservation) -> bool {
        self.room_id.is_none_or(|id| r.room_id == id)
            && self.user_id.is_none_or(|id| r.user_id == id)
            && self.status.is_none_or(|s| r.status == s)
            && self.window.is_none_or(|w| r.window.overlaps(&w))
    }
}

/// One state change, as applied to memory and appended to the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreEvent {
    /// Record written with its final id and version.
    Put(Record),
    /// Record removed. Deleting a room also removes its reservations.
    Deleted { kind: EntityKind, id: Ulid },
}

#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn get(&self, kind: EntityKind, id: Ulid) -> Result<Record, StoreError>;

    /// All records of a kind, ordered by id.
    async fn list(&self, kind: EntityKind) -> Result<Vec<Record>, StoreError>;

    async fn count(&self, kind: EntityKind) -> Result<u64, StoreError>;

    /// `limit` records of a kind starting at `offset`, ordered by id.
    async fn page(
        &self,
        kind: EntityKind,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Record>, StoreError>;

    async fn query_reservations(
        &self,
        query: &ReservationQuery,
    ) -> Result<Vec<Reservation>, StoreError>;

    /// Assign an id, stamp the initial version, persist. Returns both.
    async fn insert(&self, record: Record) -> Result<(Ulid, Version), StoreError>;

    /// Persist `record` iff the stored version is still `expected`.
    async fn conditional_update(
        &self,
        kind: EntityKind,
        id: Ulid,
        expected: Version,
        record: Record,
    ) -> Result<Version, StoreError>;

    /// Remove the record iff the stored version is still `expected`.
    async fn conditional_delete(
        &self,
        kind: EntityKind,
        id: Ulid,
        expected: Version,
    ) -> Result<(), StoreError>;

    async fn query_confirmed_reservations(
        &self,
        room_id: Option<Ulid>,
        window: Option<Window>,
    ) -> Result<Vec<Reservation>, StoreError> {
        self.query_reservations(&ReservationQuery {
            room_id,
            user_id: None,
            status: Some(ReservationStatus::Confirmed),
            window,
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reservation(room_id: Ulid, user_id: Ulid, start: Ms, end: Ms) -> Reservation {
        Reservation {
            id: Ulid::new(),
            room_id,
            user_id,
            window: Window::new(start, end).unwrap(),
            reason: None,
            status: ReservationStatus::Confirmed,
            version: 1,
        }
    }

    #[test]
    fn empty_query_matches_everything() {
        let r = reservation(Ulid::new(), Ulid::new(), 0, 10);
        assert!(ReservationQuery::default().matches(&r));
    }

    #[test]
    fn query_fields_combine_with_and() {
        let room = Ulid::new();
        let user = Ulid::new();
        let r = reservation(room, user, 100, 200);

        let q = ReservationQuery {
            room_id: Some(room),
            user_id: Some(user),
            status: Some(ReservationStatus::Confirmed),
            window: Some(Window::new(150, 300).unwrap()),
        };
        assert!(q.matches(&r));

        let other_user = ReservationQuery {
            user_id: Some(Ulid::new()),
            ..q
        };
        assert!(!other_user.matches(&r));

        let touching = ReservationQuery {
            window: Some(Window::new(200, 300).unwrap()),
            ..q
        };
        assert!(!touching.matches(&r));

        let cancelled_only = ReservationQuery {
            status: Some(ReservationStatus::Cancelled),
            ..q
        };
        assert!(!cancelled_only.matches(&r));
    }
}
