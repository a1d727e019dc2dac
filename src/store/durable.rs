use std::io;
use std::path::Path;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

use super::memory::{WriteOp, inserted, updated};
use super::{EntityStore, InMemoryStore, ReservationQuery, StoreError, StoreEvent};

fn io_unavailable(e: io::Error) -> StoreError {
    StoreError::Unavailable(format!("log I/O: {e}"))
}

/// [`InMemoryStore`] made durable by a write-ahead log.
///
/// Reads are served from memory. Each write is checked against memory,
/// appended and fsynced, then applied, all while holding the log lock, so
/// the log order is the commit order.
pub struct WalStore {
    memory: InMemoryStore,
    wal: Mutex<Wal>,
    /// Appends between automatic compactions. 0 disables them.
    compact_threshold: u64,
}

impl WalStore {
    pub fn open(path: &Path, compact_threshold: u64) -> Result<Self, StoreError> {
        let (wal, events) = Wal::open(path).map_err(io_unavailable)?;
        let memory = InMemoryStore::new();
        for event in &events {
            memory.apply(event);
        }
        info!("replayed {} log entries from {}", events.len(), path.display());
        Ok(Self {
            memory,
            wal: Mutex::new(wal),
            compact_threshold,
        })
    }

    async fn commit(&self, op: WriteOp) -> Result<StoreEvent, StoreError> {
        let mut wal = self.wal.lock().await;
        let event = self.memory.prepare(op)?;

        let flush_start = Instant::now();
        wal.append(&event).map_err(io_unavailable)?;
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        self.memory.apply(&event);

        if self.compact_threshold > 0 && wal.appends_since_compact() >= self.compact_threshold {
            // The write is already durable; a failed compaction only leaves a longer log.
            match wal.compact(&self.memory.snapshot()) {
                Ok(()) => info!("compacted log {}", wal.path().display()),
                Err(e) => warn!("log compaction failed: {e}"),
            }
        }
        Ok(event)
    }

    /// Rewrite the log as one entry per live record.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let mut wal = self.wal.lock().await;
        wal.compact(&self.memory.snapshot()).map_err(io_unavailable)
    }

    pub async fn appends_since_compact(&self) -> u64 {
        self.wal.lock().await.appends_since_compact()
    }
}

#[async_trait]
impl EntityStore for WalStore {
    async fn get(&self, kind: EntityKind, id: Ulid) -> Result<Record, StoreError> {
        self.memory.get(kind, id).await
    }

    async fn list(&self, kind: EntityKind) -> Result<Vec<Record>, StoreError> {
        self.memory.list(kind).await
    }

    async fn count(&self, kind: EntityKind) -> Result<u64, StoreError> {
        self.memory.count(kind).await
    }

    async fn page(
        &self,
        kind: EntityKind,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Record>, StoreError> {
        self.memory.page(kind, offset, limit).await
    }

    async fn query_reservations(
        &self,
        query: &ReservationQuery,
    ) -> Result<Vec<Reservation>, StoreError> {
        self.memory.query_reservations(query).await
    }

    async fn insert(&self, record: Record) -> Result<(Ulid, Version), StoreError> {
        inserted(self.commit(WriteOp::Insert(record)).await?)
    }

    async fn conditional_update(
        &self,
        kind: EntityKind,
        id: Ulid,
        expected: Version,
        record: Record,
    ) -> Result<Version, StoreError> {
        updated(
            self.commit(WriteOp::Update {
                kind,
                id,
                expected,
                record,
            })
            .await?,
        )
    }

    async fn conditional_delete(
        &self,
        kind: EntityKind,
        id: Ulid,
        expected: Version,
    ) -> Result<(), StoreError> {
        self.commit(WriteOp::Delete { kind, id, expected }).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::path::PathBuf;

    use super::*;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("roombook_test_store");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn room(name: &str) -> Record {
        Record::Room(Room {
            id: Ulid::nil(),
            name: name.into(),
            capacity: 12,
            building: None,
            floor: None,
            number: None,
            description: None,
            equipment: BTreeSet::new(),
            version: 0,
        })
    }

    fn user() -> Record {
        Record::User(User {
            id: Ulid::nil(),
            first_name: "Grace".into(),
            last_name: "Hopper".into(),
            email: None,
            phone: None,
            department: Some("Navy".into()),
            version: 0,
        })
    }

    fn reservation(room_id: Ulid, user_id: Ulid) -> Record {
        Record::Reservation(Reservation {
            id: Ulid::nil(),
            room_id,
            user_id,
            window: Window::new(1_000, 2_000).unwrap(),
            reason: Some("standup".into()),
            status: ReservationStatus::Confirmed,
            version: 0,
        })
    }

    #[tokio::test]
    async fn state_survives_reopen() {
        let path = test_wal_path("reopen.wal");
        let (room_id, res_id) = {
            let store = WalStore::open(&path, 0).unwrap();
            let (room_id, v) = store.insert(room("A1")).await.unwrap();
            store
                .conditional_update(EntityKind::Room, room_id, v, room("A1 west"))
                .await
                .unwrap();
            let (user_id, _) = store.insert(user()).await.unwrap();
            let (res_id, _) = store.insert(reservation(room_id, user_id)).await.unwrap();
            (room_id, res_id)
        };

        let store = WalStore::open(&path, 0).unwrap();
        match store.get(EntityKind::Room, room_id).await.unwrap() {
            Record::Room(r) => {
                assert_eq!(r.name, "A1 west");
                assert_eq!(r.version, 2);
            }
            other => panic!("unexpected record {other:?}"),
        }
        let hits = store
            .query_confirmed_reservations(Some(room_id), None)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, res_id);
    }

    #[tokio::test]
    async fn writes_after_a_torn_tail_survive_the_next_reopen() {
        use std::io::Write;

        let path = test_wal_path("torn_tail.wal");
        let first = {
            let store = WalStore::open(&path, 0).unwrap();
            store.insert(room("before crash")).await.unwrap().0
        };
        {
            let mut f = std::fs::OpenOptions::new()
                .append(true)
                .open(&path)
                .unwrap();
            f.write_all(&[0xAB; 7]).unwrap();
        }

        let second = {
            let store = WalStore::open(&path, 0).unwrap();
            assert_eq!(store.count(EntityKind::Room).await.unwrap(), 1);
            store.insert(room("after restart")).await.unwrap().0
        };

        let store = WalStore::open(&path, 0).unwrap();
        assert_eq!(store.count(EntityKind::Room).await.unwrap(), 2);
        for id in [first, second] {
            assert!(store.get(EntityKind::Room, id).await.is_ok());
        }
    }

    #[tokio::test]
    async fn rejected_write_is_not_logged() {
        let path = test_wal_path("rejected.wal");
        let store = WalStore::open(&path, 0).unwrap();
        let (id, v1) = store.insert(room("A1")).await.unwrap();
        store
            .conditional_update(EntityKind::Room, id, v1, room("A1"))
            .await
            .unwrap();
        let stale = store
            .conditional_update(EntityKind::Room, id, v1, room("lost"))
            .await;
        assert!(matches!(stale, Err(StoreError::VersionConflict { .. })));
        assert_eq!(store.appends_since_compact().await, 2);
    }

    #[tokio::test]
    async fn cascade_delete_replays() {
        let path = test_wal_path("cascade.wal");
        {
            let store = WalStore::open(&path, 0).unwrap();
            let (room_id, v) = store.insert(room("A1")).await.unwrap();
            let (user_id, _) = store.insert(user()).await.unwrap();
            store.insert(reservation(room_id, user_id)).await.unwrap();
            store
                .conditional_delete(EntityKind::Room, room_id, v)
                .await
                .unwrap();
        }
        let store = WalStore::open(&path, 0).unwrap();
        assert_eq!(store.count(EntityKind::Room).await.unwrap(), 0);
        assert_eq!(store.count(EntityKind::Reservation).await.unwrap(), 0);
        assert_eq!(store.count(EntityKind::User).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn compaction_preserves_versions() {
        let path = test_wal_path("compact_versions.wal");
        let id = {
            let store = WalStore::open(&path, 0).unwrap();
            let (id, mut v) = store.insert(room("A1")).await.unwrap();
            for i in 0..5 {
                v = store
                    .conditional_update(EntityKind::Room, id, v, room(&format!("A1 rev {i}")))
                    .await
                    .unwrap();
            }
            store.compact().await.unwrap();
            assert_eq!(store.appends_since_compact().await, 0);
            id
        };

        let store = WalStore::open(&path, 0).unwrap();
        let record = store.get(EntityKind::Room, id).await.unwrap();
        assert_eq!(record.version(), 6);
        // Next writer must still present the pre-compaction version.
        assert!(
            store
                .conditional_update(EntityKind::Room, id, 5, room("stale"))
                .await
                .is_err()
        );
        assert_eq!(
            store
                .conditional_update(EntityKind::Room, id, 6, room("fresh"))
                .await
                .unwrap(),
            7
        );
    }

    #[tokio::test]
    async fn automatic_compaction_at_threshold() {
        let path = test_wal_path("auto_compact.wal");
        let store = WalStore::open(&path, 3).unwrap();
        for i in 0..3 {
            store.insert(room(&format!("R{i}"))).await.unwrap();
        }
        assert_eq!(store.appends_since_compact().await, 0);
        store.insert(room("R3")).await.unwrap();
        assert_eq!(store.appends_since_compact().await, 1);

        drop(store);
        let store = WalStore::open(&path, 3).unwrap();
        assert_eq!(store.count(EntityKind::Room).await.unwrap(), 4);
    }
}
