use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use dashmap::DashMap;
use ulid::Ulid;

use crate::model::*;

use super::{EntityStore, ReservationQuery, StoreError, StoreEvent};

/// A write before it has been checked against current state.
#[derive(Debug, Clone)]
pub(crate) enum WriteOp {
    Insert(Record),
    Update {
        kind: EntityKind,
        id: Ulid,
        expected: Version,
        record: Record,
    },
    Delete {
        kind: EntityKind,
        id: Ulid,
        expected: Version,
    },
}

/// Reference store: one DashMap per kind, reads lock-free, writes serialized
/// through a gate so a check-and-set can look across tables.
pub struct InMemoryStore {
    rooms: DashMap<Ulid, Record>,
    equipment: DashMap<Ulid, Record>,
    users: DashMap<Ulid, Record>,
    reservations: DashMap<Ulid, Record>,
    /// Room → reservation ids, for room-scoped queries and cascade.
    room_reservations: DashMap<Ulid, Vec<Ulid>>,
    write_gate: Mutex<()>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
            equipment: DashMap::new(),
            users: DashMap::new(),
            reservations: DashMap::new(),
            room_reservations: DashMap::new(),
            write_gate: Mutex::new(()),
        }
    }

    fn table(&self, kind: EntityKind) -> &DashMap<Ulid, Record> {
        match kind {
            EntityKind::Room => &self.rooms,
            EntityKind::Equipment => &self.equipment,
            EntityKind::User => &self.users,
            EntityKind::Reservation => &self.reservations,
        }
    }

    fn gate(&self) -> Result<MutexGuard<'_, ()>, StoreError> {
        self.write_gate
            .lock()
            .map_err(|_| StoreError::Unavailable("store write lock poisoned".into()))
    }

    fn contains(&self, kind: EntityKind, id: &Ulid) -> bool {
        self.table(kind).contains_key(id)
    }

    fn stored_version(&self, kind: EntityKind, id: Ulid) -> Result<Version, StoreError> {
        self.table(kind)
            .get(&id)
            .map(|e| e.value().version())
            .ok_or(StoreError::NotFound { kind, id })
    }

    fn check_references(&self, record: &Record) -> Result<(), StoreError> {
        match record {
            Record::Reservation(r) => {
                if !self.contains(EntityKind::Room, &r.room_id) {
                    return Err(StoreError::MissingReference {
                        kind: EntityKind::Room,
                        id: r.room_id,
                    });
                }
                if !self.contains(EntityKind::User, &r.user_id) {
                    return Err(StoreError::MissingReference {
                        kind: EntityKind::User,
                        id: r.user_id,
                    });
                }
            }
            Record::Room(room) => {
                if let Some(missing) = room
                    .equipment
                    .iter()
                    .find(|id| !self.contains(EntityKind::Equipment, id))
                {
                    return Err(StoreError::MissingReference {
                        kind: EntityKind::Equipment,
                        id: *missing,
                    });
                }
            }
            Record::Equipment(_) | Record::User(_) => {}
        }
        Ok(())
    }

    fn is_referenced(&self, kind: EntityKind, id: Ulid) -> bool {
        match kind {
            EntityKind::User => self.reservations.iter().any(|e| match e.value() {
                Record::Reservation(r) => r.user_id == id,
                _ => false,
            }),
            EntityKind::Equipment => self.rooms.iter().any(|e| match e.value() {
                Record::Room(room) => room.equipment.contains(&id),
                _ => false,
            }),
            // Rooms cascade; reservations are leaves.
            EntityKind::Room | EntityKind::Reservation => false,
        }
    }

    /// Check a write against current state and turn it into the event that
    /// would apply it. Callers must hold whatever serializes writers.
    pub(crate) fn prepare(&self, op: WriteOp) -> Result<StoreEvent, StoreError> {
        match op {
            WriteOp::Insert(mut record) => {
                self.check_references(&record)?;
                record.set_id(Ulid::new());
                record.set_version(1);
                Ok(StoreEvent::Put(record))
            }
            WriteOp::Update {
                kind,
                id,
                expected,
                mut record,
            } => {
                if record.kind() != kind {
                    return Err(StoreError::Unavailable(format!(
                        "cannot store a {} under {kind} {id}",
                        record.kind()
                    )));
                }
                let actual = self.stored_version(kind, id)?;
                if actual != expected {
                    return Err(StoreError::VersionConflict {
                        kind,
                        id,
                        expected,
                        actual,
                    });
                }
                self.check_references(&record)?;
                record.set_id(id);
                record.set_version(expected + 1);
                Ok(StoreEvent::Put(record))
            }
            WriteOp::Delete { kind, id, expected } => {
                let actual = self.stored_version(kind, id)?;
                if actual != expected {
                    return Err(StoreError::VersionConflict {
                        kind,
                        id,
                        expected,
                        actual,
                    });
                }
                if self.is_referenced(kind, id) {
                    return Err(StoreError::StillReferenced { kind, id });
                }
                Ok(StoreEvent::Deleted { kind, id })
            }
        }
    }

    /// Apply an already-checked event. Also used for log replay.
    pub(crate) fn apply(&self, event: &StoreEvent) {
        match event {
            StoreEvent::Put(record) => {
                let id = record.id();
                let previous = self.table(record.kind()).insert(id, record.clone());
                if let Record::Reservation(r) = record {
                    if let Some(Record::Reservation(old)) = previous {
                        if old.room_id == r.room_id {
                            return;
                        }
                        self.unindex_reservation(&old.room_id, &id);
                    }
                    self.room_reservations.entry(r.room_id).or_default().push(id);
                }
            }
            StoreEvent::Deleted { kind, id } => {
                let removed = self.table(*kind).remove(id);
                match (kind, removed) {
                    (EntityKind::Room, _) => {
                        if let Some((_, ids)) = self.room_reservations.remove(id) {
                            for rid in ids {
                                self.reservations.remove(&rid);
                            }
                        }
                    }
                    (EntityKind::Reservation, Some((_, Record::Reservation(r)))) => {
                        self.unindex_reservation(&r.room_id, id);
                    }
                    _ => {}
                }
            }
        }
    }

    fn unindex_reservation(&self, room_id: &Ulid, reservation_id: &Ulid) {
        if let Some(mut ids) = self.room_reservations.get_mut(room_id) {
            ids.retain(|r| r != reservation_id);
        }
    }

    /// Check and apply in one step under the write gate.
    pub(crate) fn write(&self, op: WriteOp) -> Result<StoreEvent, StoreError> {
        let _gate = self.gate()?;
        let event = self.prepare(op)?;
        self.apply(&event);
        Ok(event)
    }

    /// Events that rebuild the current state from nothing. Referenced
    /// kinds come before the kinds that point at them.
    pub(crate) fn snapshot(&self) -> Vec<StoreEvent> {
        let mut events = Vec::new();
        for kind in [
            EntityKind::Equipment,
            EntityKind::Room,
            EntityKind::User,
            EntityKind::Reservation,
        ] {
            events.extend(self.sorted(kind).into_iter().map(StoreEvent::Put));
        }
        events
    }

    fn sorted(&self, kind: EntityKind) -> Vec<Record> {
        let mut records: Vec<Record> = self
            .table(kind)
            .iter()
            .map(|e| e.value().clone())
            .collect();
        records.sort_by_key(|r| r.id());
        records
    }

    fn reservations_matching(&self, query: &ReservationQuery) -> Vec<Reservation> {
        let candidates: Vec<Record> = match query.room_id {
            Some(room_id) => self
                .room_reservations
                .get(&room_id)
                .map(|ids| {
                    ids.iter()
                        .filter_map(|id| self.reservations.get(id).map(|e| e.value().clone()))
                        .collect()
                })
                .unwrap_or_default(),
            None => self.reservations.iter().map(|e| e.value().clone()).collect(),
        };
        let mut out: Vec<Reservation> = candidates
            .into_iter()
            .filter_map(|record| match record {
                Record::Reservation(r) if query.matches(&r) => Some(r),
                _ => None,
            })
            .collect();
        out.sort_by_key(|r| (r.window.start(), r.id));
        out
    }
}

pub(crate) fn inserted(event: StoreEvent) -> Result<(Ulid, Version), StoreError> {
    match event {
        StoreEvent::Put(record) => Ok((record.id(), record.version())),
        StoreEvent::Deleted { kind, id } => Err(StoreError::Unavailable(format!(
            "write of {kind} {id} produced a delete"
        ))),
    }
}

pub(crate) fn updated(event: StoreEvent) -> Result<Version, StoreError> {
    inserted(event).map(|(_, version)| version)
}

#[async_trait]
impl EntityStore for InMemoryStore {
    async fn get(&self, kind: EntityKind, id: Ulid) -> Result<Record, StoreError> {
        self.table(kind)
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(StoreError::NotFound { kind, id })
    }

    async fn list(&self, kind: EntityKind) -> Result<Vec<Record>, StoreError> {
        Ok(self.sorted(kind))
    }

    async fn count(&self, kind: EntityKind) -> Result<u64, StoreError> {
        Ok(self.table(kind).len() as u64)
    }

    async fn page(
        &self,
        kind: EntityKind,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Record>, StoreError> {
        Ok(self.sorted(kind).into_iter().skip(offset).take(limit).collect())
    }

    async fn query_reservations(
        &self,
        query: &ReservationQuery,
    ) -> Result<Vec<Reservation>, StoreError> {
        Ok(self.reservations_matching(query))
    }

    async fn insert(&self, record: Record) -> Result<(Ulid, Version), StoreError> {
        inserted(self.write(WriteOp::Insert(record))?)
    }

    async fn conditional_update(
        &self,
        kind: EntityKind,
        id: Ulid,
        expected: Version,
        record: Record,
    ) -> Result<Version, StoreError> {
        updated(self.write(WriteOp::Update {
            kind,
            id,
            expected,
            record,
        })?)
    }

    async fn conditional_delete(
        &self,
        kind: EntityKind,
        id: Ulid,
        expected: Version,
    ) -> Result<(), StoreError> {
        self.write(WriteOp::Delete { kind, id, expected })?;
        Ok(())
    }
}
