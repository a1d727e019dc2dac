use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::EngineError;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

/// Per-record write counter. Drafts carry 0; the store stamps 1 on insert.
pub type Version = u64;

/// Half-open interval `[start, end)` a room is requested for. Always
/// non-empty: every constructor, decoding included, checks `start < end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawWindow")]
pub struct Window {
    start: Ms,
    end: Ms,
}

/// Unchecked wire form of a [`Window`].
#[derive(Deserialize)]
struct RawWindow {
    start: Ms,
    end: Ms,
}

impl TryFrom<RawWindow> for Window {
    type Error = EngineError;

    fn try_from(raw: RawWindow) -> Result<Self, Self::Error> {
        Window::new(raw.start, raw.end)
    }
}

impl Window {
    /// Build a window, rejecting empty and inverted ranges.
    pub fn new(start: Ms, end: Ms) -> Result<Self, EngineError> {
        if start >= end {
            return Err(EngineError::Validation(format!(
                "window start {start} must be before end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    /// Build a window from instants that may be missing on the caller side.
    pub fn from_parts(start: Option<Ms>, end: Option<Ms>) -> Result<Self, EngineError> {
        match (start, end) {
            (Some(start), Some(end)) => Self::new(start, end),
            (None, _) => Err(EngineError::Validation("window start is required".into())),
            (_, None) => Err(EngineError::Validation("window end is required".into())),
        }
    }

    pub fn start(&self) -> Ms {
        self.start
    }

    pub fn end(&self) -> Ms {
        self.end
    }

    /// Same start, end pushed out to `end` if that is later.
    pub(crate) fn extended_to(self, end: Ms) -> Self {
        Self {
            start: self.start,
            end: self.end.max(end),
        }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// The one overlap rule. Touching endpoints do not overlap.
    pub fn overlaps(&self, other: &Window) -> bool {
        self.start < other.end && self.end > other.start
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    Room,
    Equipment,
    User,
    Reservation,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Room => "room",
            EntityKind::Equipment => "equipment",
            EntityKind::User => "user",
            EntityKind::Reservation => "reservation",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    Confirmed,
    Pending,
    Cancelled,
}

impl ReservationStatus {
    /// Only confirmed reservations take a room out of circulation.
    pub fn blocks_room(&self) -> bool {
        matches!(self, ReservationStatus::Confirmed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: Ulid,
    pub name: String,
    /// Seats. Always at least 1.
    pub capacity: u32,
    pub building: Option<String>,
    pub floor: Option<i32>,
    pub number: Option<String>,
    pub description: Option<String>,
    pub equipment: BTreeSet<Ulid>,
    pub version: Version,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Equipment {
    pub id: Ulid,
    pub name: String,
    pub description: Option<String>,
    pub reference: Option<String>,
    pub version: Version,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Ulid,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub department: Option<String>,
    pub version: Version,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub room_id: Ulid,
    pub user_id: Ulid,
    pub window: Window,
    pub reason: Option<String>,
    pub status: ReservationStatus,
    pub version: Version,
}

impl Reservation {
    pub fn blocks(&self, window: &Window) -> bool {
        self.status.blocks_room() && self.window.overlaps(window)
    }
}

/// Any record the entity store holds. Records reference each other by id only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Record {
    Room(Room),
    Equipment(Equipment),
    User(User),
    Reservation(Reservation),
}

impl Record {
    pub fn kind(&self) -> EntityKind {
        match self {
            Record::Room(_) => EntityKind::Room,
            Record::Equipment(_) => EntityKind::Equipment,
            Record::User(_) => EntityKind::User,
            Record::Reservation(_) => EntityKind::Reservation,
        }
    }

    pub fn id(&self) -> Ulid {
        match self {
            Record::Room(r) => r.id,
            Record::Equipment(e) => e.id,
            Record::User(u) => u.id,
            Record::Reservation(r) => r.id,
        }
    }

    pub fn version(&self) -> Version {
        match self {
            Record::Room(r) => r.version,
            Record::Equipment(e) => e.version,
            Record::User(u) => u.version,
            Record::Reservation(r) => r.version,
        }
    }

    pub fn set_id(&mut self, id: Ulid) {
        match self {
            Record::Room(r) => r.id = id,
            Record::Equipment(e) => e.id = id,
            Record::User(u) => u.id = id,
            Record::Reservation(r) => r.id = id,
        }
    }

    pub fn set_version(&mut self, version: Version) {
        match self {
            Record::Room(r) => r.version = version,
            Record::Equipment(e) => e.version = version,
            Record::User(u) => u.version = version,
            Record::Reservation(r) => r.version = version,
        }
    }
}

/// Typed view over [`Record`] used by the OCC layer and queries.
pub trait Entity: Clone + Send + Sync + 'static {
    const KIND: EntityKind;

    fn id(&self) -> Ulid;
    fn version(&self) -> Version;
    fn set_version(&mut self, version: Version);
    fn into_record(self) -> Record;
    fn from_record(record: Record) -> Result<Self, EngineError>;
}

macro_rules! impl_entity {
    ($ty:ident, $kind:ident) => {
        impl Entity for $ty {
            const KIND: EntityKind = EntityKind::$kind;

            fn id(&self) -> Ulid {
                self.id
            }

            fn version(&self) -> Version {
                self.version
            }

            fn set_version(&mut self, version: Version) {
                self.version = version;
            }

            fn into_record(self) -> Record {
                Record::$kind(self)
            }

            fn from_record(record: Record) -> Result<Self, EngineError> {
                match record {
                    Record::$kind(value) => Ok(value),
                    other => Err(EngineError::StoreUnavailable(format!(
                        "store returned a {} where a {} was expected",
                        other.kind(),
                        EntityKind::$kind
                    ))),
                }
            }
        }
    };
}

impl_entity!(Room, Room);
impl_entity!(Equipment, Equipment);
impl_entity!(User, User);
impl_entity!(Reservation, Reservation);

// ── Input types ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationRequest {
    pub room_id: Ulid,
    pub user_id: Ulid,
    pub window: Window,
    pub reason: Option<String>,
    /// Initial status; `Confirmed` unless the caller asks for `Pending`.
    pub status: ReservationStatus,
}

impl ReservationRequest {
    pub fn new(room_id: Ulid, user_id: Ulid, window: Window) -> Self {
        Self {
            room_id,
            user_id,
            window,
            reason: None,
            status: ReservationStatus::Confirmed,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn pending(mut self) -> Self {
        self.status = ReservationStatus::Pending;
        self
    }
}

/// Edits applied to an existing reservation. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationChanges {
    pub window: Option<Window>,
    /// `Some(None)` clears the reason.
    pub reason: Option<Option<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewRoom {
    pub name: String,
    pub capacity: u32,
    pub building: Option<String>,
    pub floor: Option<i32>,
    pub number: Option<String>,
    pub description: Option<String>,
    pub equipment: BTreeSet<Ulid>,
}

impl NewRoom {
    pub fn new(name: impl Into<String>, capacity: u32) -> Self {
        Self {
            name: name.into(),
            capacity,
            ..Default::default()
        }
    }

    pub fn located(mut self, building: impl Into<String>, floor: i32) -> Self {
        self.building = Some(building.into());
        self.floor = Some(floor);
        self
    }

    pub fn with_equipment(mut self, equipment_id: Ulid) -> Self {
        self.equipment.insert(equipment_id);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewEquipment {
    pub name: String,
    pub description: Option<String>,
    pub reference: Option<String>,
}

impl NewEquipment {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewUser {
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub department: Option<String>,
}

impl NewUser {
    pub fn new(first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        Self {
            first_name: first_name.into(),
            last_name: last_name.into(),
            ..Default::default()
        }
    }
}
