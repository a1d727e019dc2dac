//! Optimistic concurrency control.
//!
//! `load` → [`Loaded`] (version v) → `modify` → [`Modified`] (expects v) →
//! `commit` → the value at v+1, or [`EngineError::VersionConflict`] if some
//! other writer committed first. Nothing is locked between load and commit,
//! and nothing here retries: the loser reloads and decides again.

use tracing::debug;
use ulid::Ulid;

use crate::model::*;
use crate::store::{EntityStore, StoreError};

use super::EngineError;

/// A record as read, with the version it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Loaded<T> {
    value: T,
}

impl<T: Entity> Loaded<T> {
    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn version(&self) -> Version {
        self.value.version()
    }

    pub fn into_inner(self) -> T {
        self.value
    }

    pub fn modify(self, f: impl FnOnce(&mut T)) -> Modified<T> {
        let expected = self.version();
        let mut value = self.value;
        f(&mut value);
        Modified { value, expected }
    }

    pub fn try_modify(
        self,
        f: impl FnOnce(&mut T) -> Result<(), EngineError>,
    ) -> Result<Modified<T>, EngineError> {
        let expected = self.version();
        let mut value = self.value;
        f(&mut value)?;
        Ok(Modified { value, expected })
    }
}

/// A new value waiting to be written over the version it was derived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Modified<T> {
    value: T,
    expected: Version,
}

impl<T: Entity> Modified<T> {
    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn expected_version(&self) -> Version {
        self.expected
    }
}

pub struct Occ<'a> {
    store: &'a dyn EntityStore,
}

impl<'a> Occ<'a> {
    pub fn new(store: &'a dyn EntityStore) -> Self {
        Self { store }
    }

    pub async fn load<T: Entity>(&self, id: Ulid) -> Result<Loaded<T>, EngineError> {
        let record = self.store.get(T::KIND, id).await?;
        Ok(Loaded {
            value: T::from_record(record)?,
        })
    }

    /// Persist a draft. The store assigns its id and first version.
    pub async fn insert<T: Entity>(&self, draft: T) -> Result<T, EngineError> {
        let mut record = draft.into_record();
        let (id, version) = self.store.insert(record.clone()).await?;
        record.set_id(id);
        record.set_version(version);
        T::from_record(record)
    }

    /// Conditional write. Exactly one of several commits derived from the
    /// same version can succeed.
    pub async fn commit<T: Entity>(&self, modified: Modified<T>) -> Result<T, EngineError> {
        let Modified {
            mut value,
            expected,
        } = modified;
        let id = value.id();
        match self
            .store
            .conditional_update(T::KIND, id, expected, value.clone().into_record())
            .await
        {
            Ok(version) => {
                value.set_version(version);
                Ok(value)
            }
            Err(e) => Err(conflict_aware(e)),
        }
    }

    /// Conditional delete at the loaded version.
    pub async fn delete<T: Entity>(&self, loaded: Loaded<T>) -> Result<(), EngineError> {
        let id = loaded.value.id();
        self.store
            .conditional_delete(T::KIND, id, loaded.version())
            .await
            .map_err(conflict_aware)
    }
}

fn conflict_aware(e: StoreError) -> EngineError {
    if let StoreError::VersionConflict {
        kind,
        id,
        expected,
        actual,
    } = &e
    {
        debug!("version conflict on {kind} {id}: read {expected}, store has {actual}");
        metrics::counter!(
            crate::observability::VERSION_CONFLICTS_TOTAL,
            "kind" => kind.as_str()
        )
        .increment(1);
    }
    e.into()
}
