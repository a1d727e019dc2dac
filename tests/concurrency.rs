use std::sync::Arc;

use futures::future::join_all;
use ulid::Ulid;

use roombook::engine::{Engine, EngineError, retry_on_version_conflict};
use roombook::model::*;
use roombook::store::{EntityStore, InMemoryStore, WalStore};

const H: Ms = 3_600_000;
/// Monday 2026-01-05 00:00 UTC.
const MON: Ms = 1_767_571_200_000;

// ── Test infrastructure ──────────────────────────────────────

fn slot(from_hour: i64, to_hour: i64) -> Window {
    Window::new(MON + from_hour * H, MON + to_hour * H).unwrap()
}

async fn setup(engine: &Engine, rooms: usize, users: usize) -> (Vec<Ulid>, Vec<Ulid>) {
    let mut room_ids = Vec::new();
    for i in 0..rooms {
        let room = engine
            .create_room(NewRoom::new(format!("R{i}"), 8))
            .await
            .unwrap();
        room_ids.push(room.id);
    }
    let mut user_ids = Vec::new();
    for i in 0..users {
        let user = engine
            .create_user(NewUser::new("User", format!("{i}")))
            .await
            .unwrap();
        user_ids.push(user.id);
    }
    (room_ids, user_ids)
}

async fn confirmed_overlaps(engine: &Engine, room_id: Ulid) -> usize {
    let confirmed: Vec<Reservation> = engine
        .reservations_for_room(room_id)
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.status == ReservationStatus::Confirmed)
        .collect();
    let mut overlaps = 0;
    for (i, a) in confirmed.iter().enumerate() {
        for b in &confirmed[i + 1..] {
            if a.window.overlaps(&b.window) {
                overlaps += 1;
            }
        }
    }
    overlaps
}

// ── Version-checked writes ───────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn competing_cancels_from_one_read() {
    let engine = Engine::in_memory();
    let (rooms, users) = setup(&engine, 1, 1).await;
    let r = engine
        .create_reservation(ReservationRequest::new(rooms[0], users[0], slot(9, 10)))
        .await
        .unwrap();

    // Every task read version 1 before any of them wrote.
    let loaded = engine.occ().load::<Reservation>(r.id).await.unwrap();
    let tasks = (0..6).map(|_| {
        let engine = engine.clone();
        let loaded = loaded.clone();
        tokio::spawn(async move {
            let modified = loaded.modify(|res| res.status = ReservationStatus::Cancelled);
            engine.occ().commit(modified).await
        })
    });
    let results: Vec<_> = join_all(tasks).await.into_iter().map(|j| j.unwrap()).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(EngineError::is_retryable)
    );
    assert_eq!(engine.get_reservation(r.id).await.unwrap().version, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_bookings_on_distinct_rooms_all_succeed() {
    let engine = Engine::in_memory();
    let (rooms, users) = setup(&engine, 8, 8).await;

    let tasks = rooms.iter().zip(&users).map(|(&room_id, &user_id)| {
        let engine = engine.clone();
        tokio::spawn(async move {
            for hour in 0..12 {
                engine
                    .create_reservation(ReservationRequest::new(
                        room_id,
                        user_id,
                        slot(hour, hour + 1),
                    ))
                    .await?;
            }
            Ok::<_, EngineError>(())
        })
    });
    for joined in join_all(tasks).await {
        joined.unwrap().unwrap();
    }
    assert_eq!(engine.count(EntityKind::Reservation).await.unwrap(), 96);
    for room_id in rooms {
        assert_eq!(confirmed_overlaps(&engine, room_id).await, 0);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn moves_into_a_held_slot_never_double_book() {
    let engine = Engine::in_memory();
    let (rooms, users) = setup(&engine, 1, 4).await;
    let room_id = rooms[0];

    let anchor = engine
        .create_reservation(ReservationRequest::new(room_id, users[0], slot(12, 13)))
        .await
        .unwrap();
    let mut movers = Vec::new();
    for (i, &user_id) in users[1..].iter().enumerate() {
        let start = 2 * i as i64;
        let r = engine
            .create_reservation(ReservationRequest::new(room_id, user_id, slot(start, start + 1)))
            .await
            .unwrap();
        movers.push(r.id);
    }

    // All movers race for the same free hour; the anchor stays put.
    let tasks = movers.into_iter().map(|id| {
        let engine = engine.clone();
        tokio::spawn(async move {
            let engine = &engine;
            retry_on_version_conflict(3, move || {
                engine.update_reservation(
                    id,
                    ReservationChanges {
                        window: Some(slot(12, 13)),
                        ..Default::default()
                    },
                )
            })
            .await
        })
    });
    for joined in join_all(tasks).await {
        assert_eq!(
            joined.unwrap(),
            Err(EngineError::Conflict {
                room_id,
                reservation_id: anchor.id
            })
        );
    }
    assert_eq!(confirmed_overlaps(&engine, room_id).await, 0);
}

// ── Durable store under load ─────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn wal_store_replays_concurrent_history() {
    let dir = std::env::temp_dir().join(format!("roombook_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("roombook.wal");

    let (rooms, expected) = {
        let store: Arc<dyn EntityStore> = Arc::new(WalStore::open(&path, 16).unwrap());
        let engine = Engine::new(store);
        let (rooms, users) = setup(&engine, 3, 3).await;

        let tasks = users.iter().enumerate().map(|(i, &user_id)| {
            let engine = engine.clone();
            let rooms = rooms.clone();
            tokio::spawn(async move {
                for hour in 0..10 {
                    let room_id = rooms[(i + hour as usize) % rooms.len()];
                    let _ = engine
                        .create_reservation(ReservationRequest::new(
                            room_id,
                            user_id,
                            slot(hour, hour + 1),
                        ))
                        .await;
                }
            })
        });
        for joined in join_all(tasks).await {
            joined.unwrap();
        }
        let expected = engine
            .reservations_with_status(ReservationStatus::Confirmed)
            .await
            .unwrap();
        (rooms, expected)
    };

    let reopened = Engine::new(Arc::new(WalStore::open(&path, 16).unwrap()));
    let replayed = reopened
        .reservations_with_status(ReservationStatus::Confirmed)
        .await
        .unwrap();
    assert_eq!(replayed, expected);
    assert_eq!(reopened.count_rooms().await.unwrap(), 3);
    for room_id in rooms {
        assert_eq!(confirmed_overlaps(&reopened, room_id).await, 0);
    }

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn in_memory_store_is_shareable_between_engines() {
    let store: Arc<dyn EntityStore> = Arc::new(InMemoryStore::new());
    let first = Engine::new(store.clone());
    let second = Engine::new(store);

    let (rooms, users) = setup(&first, 1, 2).await;
    first
        .create_reservation(ReservationRequest::new(rooms[0], users[0], slot(9, 11)))
        .await
        .unwrap();

    let seen_elsewhere = second
        .create_reservation(ReservationRequest::new(rooms[0], users[1], slot(10, 12)))
        .await;
    assert!(matches!(seen_elsewhere, Err(EngineError::Conflict { .. })));
    assert!(second.is_room_available(rooms[0], slot(11, 12)).await.unwrap());
}
