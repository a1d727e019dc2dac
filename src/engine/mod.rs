mod availability;
mod conflict;
mod error;
mod mutations;
mod occ;
mod queries;
mod retry;

pub use availability::{RoomCriteria, merge_overlapping, subtract_windows};
pub use conflict::find_conflict;
pub use error::EngineError;
pub use occ::{Loaded, Modified, Occ};
pub use retry::retry_on_version_conflict;

use std::sync::Arc;

use ulid::Ulid;

use crate::model::*;
use crate::store::{EntityStore, InMemoryStore, StoreError};

/// Reservation core. Holds no mutable state of its own: every decision is
/// made from a store read and every write is one conditional store call,
/// so any number of engines may share a store.
#[derive(Clone)]
pub struct Engine {
    store: Arc<dyn EntityStore>,
}

impl Engine {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryStore::new()))
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    /// Read-version / write-if-unchanged access to versioned records.
    pub fn occ(&self) -> Occ<'_> {
        Occ::new(self.store.as_ref())
    }

    /// Load a record a request refers to. Absence is the caller's mistake,
    /// so it surfaces as a validation error rather than `NotFound`.
    pub(super) async fn require_reference<T: Entity>(&self, id: Ulid) -> Result<T, EngineError> {
        match self.store.get(T::KIND, id).await {
            Ok(record) => T::from_record(record),
            Err(StoreError::NotFound { kind, id }) => {
                Err(EngineError::InvalidReference { kind, id })
            }
            Err(e) => Err(e.into()),
        }
    }
}

pub(super) fn typed<T: Entity>(records: Vec<Record>) -> Result<Vec<T>, EngineError> {
    records.into_iter().map(T::from_record).collect()
}
