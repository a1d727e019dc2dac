use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tracing::{info, warn};
use ulid::Ulid;

use roombook::config::Config;
use roombook::engine::{Engine, EngineError, retry_on_version_conflict};
use roombook::model::*;
use roombook::store::{EntityStore, InMemoryStore, WalStore};

const HOUR: Ms = 3_600_000;
/// Monday 2026-01-05 08:00 UTC.
const DAY_START: Ms = 1_767_571_200_000 + 8 * HOUR;
/// Bookable hours per drill day.
const SLOTS: u64 = 10;

#[derive(Debug, Default)]
struct Tally {
    created: u64,
    room_conflicts: u64,
    moved: u64,
    cancelled: u64,
    gave_up: u64,
    failed: u64,
}

impl Tally {
    fn absorb(&mut self, other: &Tally) {
        self.created += other.created;
        self.room_conflicts += other.room_conflicts;
        self.moved += other.moved;
        self.cancelled += other.cancelled;
        self.gave_up += other.gave_up;
        self.failed += other.failed;
    }

    fn record_error(&mut self, writer: usize, e: &EngineError) {
        match e {
            EngineError::Conflict { .. } => self.room_conflicts += 1,
            EngineError::VersionConflict { .. } => self.gave_up += 1,
            other => {
                warn!("writer {writer}: {other}");
                self.failed += 1;
            }
        }
    }
}

/// xorshift64: reproducible slot choices per writer.
struct Dice(u64);

impl Dice {
    fn new(seed: u64) -> Self {
        Self(seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1)
    }

    fn roll(&mut self, sides: u64) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0 % sides
    }

    fn window(&mut self) -> Result<Window, EngineError> {
        let start = DAY_START + self.roll(SLOTS) as Ms * HOUR;
        let hours = 1 + self.roll(2) as Ms;
        Window::new(start, start + hours * HOUR)
    }
}

async fn writer(
    engine: Engine,
    rooms: Arc<Vec<Ulid>>,
    user_id: Ulid,
    id: usize,
    rounds: usize,
    max_retries: u32,
) -> Tally {
    let engine = &engine;
    let mut dice = Dice::new(id as u64 + 1);
    let mut tally = Tally::default();

    for round in 0..rounds {
        let room_id = rooms[dice.roll(rooms.len() as u64) as usize];
        let window = match dice.window() {
            Ok(w) => w,
            Err(e) => {
                tally.record_error(id, &e);
                continue;
            }
        };

        let request = ReservationRequest::new(room_id, user_id, window)
            .with_reason(format!("drill writer {id} round {round}"));
        let reservation = match engine.create_reservation(request).await {
            Ok(r) => {
                tally.created += 1;
                r
            }
            Err(e) => {
                tally.record_error(id, &e);
                continue;
            }
        };

        // Every room is shared: stamping it races the other writers.
        let stamped = retry_on_version_conflict(max_retries, move || {
            engine.update_room(room_id, move |room| {
                room.description = Some(format!("last booked by writer {id}"));
            })
        })
        .await;
        if let Err(e) = stamped {
            tally.record_error(id, &e);
        }

        let reservation_id = reservation.id;
        match dice.roll(4) {
            0 => {
                match retry_on_version_conflict(max_retries, move || {
                    engine.cancel_reservation(reservation_id)
                })
                .await
                {
                    Ok(_) => tally.cancelled += 1,
                    Err(e) => tally.record_error(id, &e),
                }
            }
            1 => {
                let changes = match dice.window() {
                    Ok(w) => ReservationChanges {
                        window: Some(w),
                        ..Default::default()
                    },
                    Err(e) => {
                        tally.record_error(id, &e);
                        continue;
                    }
                };
                match retry_on_version_conflict(max_retries, move || {
                    engine.update_reservation(reservation_id, changes.clone())
                })
                .await
                {
                    Ok(_) => tally.moved += 1,
                    Err(e) => tally.record_error(id, &e),
                }
            }
            _ => {}
        }
    }
    tally
}

/// Confirmed reservations per room that overlap a neighbour. Creates are
/// not serialized against each other, so a racing pair can land here.
async fn overlapping_pairs(engine: &Engine, rooms: &[Ulid]) -> Result<usize, EngineError> {
    let mut found = 0;
    for &room_id in rooms {
        let confirmed: Vec<Reservation> = engine
            .reservations_for_room(room_id)
            .await?
            .into_iter()
            .filter(|r| r.status.blocks_room())
            .collect();
        for (i, a) in confirmed.iter().enumerate() {
            for b in &confirmed[i + 1..] {
                if a.window.overlaps(&b.window) {
                    warn!("room {room_id}: reservations {} and {} overlap", a.id, b.id);
                    found += 1;
                }
            }
        }
    }
    Ok(found)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    roombook::observability::init(config.metrics_port)?;

    let store: Arc<dyn EntityStore> = match &config.data_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            Arc::new(WalStore::open(&dir.join("roombook.wal"), config.compact_threshold)?)
        }
        None => Arc::new(InMemoryStore::new()),
    };
    let engine = Engine::new(store);

    info!("roombook contention drill");
    info!(
        "  store: {}",
        config
            .data_dir
            .as_ref()
            .map_or("in-memory".to_string(), |d| d.display().to_string())
    );
    info!(
        "  writers: {}, rooms: {}, rounds: {}, max_retries: {}",
        config.drill_writers, config.drill_rooms, config.drill_rounds, config.max_retries
    );

    let projector = engine
        .create_equipment(NewEquipment::new("Projector"))
        .await?;
    let mut rooms = Vec::with_capacity(config.drill_rooms);
    for i in 0..config.drill_rooms {
        let room = engine
            .create_room(
                NewRoom::new(format!("Drill {}", i + 1), 4 + 2 * i as u32)
                    .located("Drill wing", (i % 3) as i32)
                    .with_equipment(projector.id),
            )
            .await?;
        rooms.push(room.id);
    }
    let rooms = Arc::new(rooms);

    let mut users = Vec::with_capacity(config.drill_writers);
    for i in 0..config.drill_writers {
        let user = engine
            .create_user(NewUser::new("Writer", format!("{}", i + 1)))
            .await?;
        users.push(user.id);
    }

    let start = Instant::now();
    let handles = users.iter().enumerate().map(|(i, &user_id)| {
        tokio::spawn(writer(
            engine.clone(),
            rooms.clone(),
            user_id,
            i,
            config.drill_rounds,
            config.max_retries,
        ))
    });

    let mut total = Tally::default();
    for result in join_all(handles).await {
        match result {
            Ok(tally) => total.absorb(&tally),
            Err(e) => warn!("writer task failed: {e}"),
        }
    }
    let elapsed = start.elapsed();

    let overlaps = overlapping_pairs(&engine, &rooms).await?;
    let confirmed = engine
        .reservations_with_status(ReservationStatus::Confirmed)
        .await?
        .len();

    info!("drill finished in {:.2}s", elapsed.as_secs_f64());
    info!(
        "  created: {}, moved: {}, cancelled: {}, confirmed now: {confirmed}",
        total.created, total.moved, total.cancelled
    );
    info!(
        "  room conflicts: {}, retries exhausted: {}, other failures: {}",
        total.room_conflicts, total.gave_up, total.failed
    );
    if overlaps == 0 {
        info!("  no overlapping confirmed reservations");
    } else {
        warn!("  {overlaps} overlapping confirmed pairs from racing creates");
    }
    Ok(())
}
