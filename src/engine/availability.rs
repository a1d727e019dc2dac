use std::collections::HashSet;

use ulid::Ulid;

use crate::model::*;

use super::conflict::validate_window;
use super::{Engine, EngineError, typed};

/// Optional room filters, combined with AND. An unset field matches every room.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomCriteria {
    /// Capacity lower bound (inclusive).
    pub capacity_min: Option<u32>,
    /// Capacity upper bound (inclusive).
    pub capacity_max: Option<u32>,
    pub building: Option<String>,
    pub floor: Option<i32>,
    /// Room must have this equipment item.
    pub equipment_id: Option<Ulid>,
}

impl RoomCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn capacity_min(mut self, min: u32) -> Self {
        self.capacity_min = Some(min);
        self
    }

    pub fn capacity_max(mut self, max: u32) -> Self {
        self.capacity_max = Some(max);
        self
    }

    pub fn building(mut self, building: impl Into<String>) -> Self {
        self.building = Some(building.into());
        self
    }

    pub fn floor(mut self, floor: i32) -> Self {
        self.floor = Some(floor);
        self
    }

    pub fn equipment(mut self, equipment_id: Ulid) -> Self {
        self.equipment_id = Some(equipment_id);
        self
    }

    pub fn matches(&self, room: &Room) -> bool {
        self.capacity_min.is_none_or(|min| room.capacity >= min)
            && self.capacity_max.is_none_or(|max| room.capacity <= max)
            && self
                .building
                .as_deref()
                .is_none_or(|b| room.building.as_deref() == Some(b))
            && self.floor.is_none_or(|f| room.floor == Some(f))
            && self
                .equipment_id
                .is_none_or(|e| room.equipment.contains(&e))
    }
}

impl Engine {
    /// Rooms with no confirmed reservation overlapping `window`.
    ///
    /// A snapshot read: a concurrent booking may take a returned room
    /// before the caller gets to it.
    pub async fn find_available_rooms(&self, window: Window) -> Result<Vec<Room>, EngineError> {
        self.available_rooms_where(window, &RoomCriteria::default())
            .await
    }

    pub async fn search_rooms(&self, criteria: &RoomCriteria) -> Result<Vec<Room>, EngineError> {
        let rooms: Vec<Room> = typed(self.store.list(EntityKind::Room).await?)?;
        Ok(rooms.into_iter().filter(|r| criteria.matches(r)).collect())
    }

    /// [`Self::find_available_rooms`] narrowed by `criteria`.
    pub async fn find_available_rooms_matching(
        &self,
        window: Window,
        criteria: &RoomCriteria,
    ) -> Result<Vec<Room>, EngineError> {
        self.available_rooms_where(window, criteria).await
    }

    async fn available_rooms_where(
        &self,
        window: Window,
        criteria: &RoomCriteria,
    ) -> Result<Vec<Room>, EngineError> {
        validate_window(&window)?;
        let busy = self.busy_rooms(&window).await?;
        let rooms = self.search_rooms(criteria).await?;
        Ok(rooms.into_iter().filter(|r| !busy.contains(&r.id)).collect())
    }

    /// Ids of rooms holding a confirmed reservation that overlaps `window`.
    async fn busy_rooms(&self, window: &Window) -> Result<HashSet<Ulid>, EngineError> {
        let confirmed = self
            .store
            .query_confirmed_reservations(None, Some(*window))
            .await?;
        // The store's window filter is a pre-filter; the overlap rule decides.
        Ok(confirmed
            .iter()
            .filter(|r| r.blocks(window))
            .map(|r| r.room_id)
            .collect())
    }

    /// Free stretches of `room_id` inside `within`, i.e. `within` minus every
    /// confirmed reservation. Useful for proposing another slot after a conflict.
    pub async fn free_windows(
        &self,
        room_id: Ulid,
        within: Window,
    ) -> Result<Vec<Window>, EngineError> {
        validate_window(&within)?;
        self.occ().load::<Room>(room_id).await?;
        let mut taken: Vec<Window> = self
            .store
            .query_confirmed_reservations(Some(room_id), Some(within))
            .await?
            .iter()
            .filter(|r| r.blocks(&within))
            .map(|r| r.window)
            .collect();
        taken.sort_by_key(Window::start);
        let taken = merge_overlapping(&taken);
        Ok(subtract_windows(&[within], &taken))
    }
}

/// Fold start-sorted windows into disjoint busy stretches. Windows that
/// touch are joined too, since no booking fits between them.
pub fn merge_overlapping(sorted: &[Window]) -> Vec<Window> {
    let mut busy: Vec<Window> = Vec::with_capacity(sorted.len());
    for window in sorted {
        match busy.last_mut() {
            Some(last) if window.start() <= last.end() => {
                *last = last.extended_to(window.end());
            }
            _ => busy.push(*window),
        }
    }
    busy
}

/// The parts of each `base` window left free by `busy`, which must be
/// sorted by start and disjoint (as [`merge_overlapping`] returns it).
pub fn subtract_windows(base: &[Window], busy: &[Window]) -> Vec<Window> {
    let mut free = Vec::new();
    for span in base {
        let mut cursor = span.start();
        for taken in busy.iter().filter(|taken| taken.overlaps(span)) {
            // Empty gaps fail construction and are skipped.
            free.extend(Window::new(cursor, taken.start()).ok());
            cursor = cursor.max(taken.end());
        }
        free.extend(Window::new(cursor, span.end()).ok());
    }
    free
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    fn w(start: Ms, end: Ms) -> Window {
        Window::new(start, end).unwrap()
    }

    fn room(capacity: u32, building: Option<&str>, floor: Option<i32>) -> Room {
        Room {
            id: Ulid::new(),
            name: "R".into(),
            capacity,
            building: building.map(String::from),
            floor,
            number: None,
            description: None,
            equipment: BTreeSet::new(),
            version: 1,
        }
    }

    #[test]
    fn empty_criteria_match_everything() {
        assert!(RoomCriteria::new().matches(&room(1, None, None)));
        assert!(RoomCriteria::new().matches(&room(500, Some("C"), Some(-1))));
    }

    #[test]
    fn capacity_bounds_are_inclusive() {
        let c = RoomCriteria::new().capacity_min(20).capacity_max(50);
        assert!(c.matches(&room(20, None, None)));
        assert!(c.matches(&room(50, None, None)));
        assert!(!c.matches(&room(19, None, None)));
        assert!(!c.matches(&room(51, None, None)));
    }

    #[test]
    fn location_filters_need_a_value_on_the_room() {
        let c = RoomCriteria::new().building("Building C").floor(2);
        assert!(c.matches(&room(10, Some("Building C"), Some(2))));
        assert!(!c.matches(&room(10, Some("Building C"), Some(3))));
        assert!(!c.matches(&room(10, Some("Building B"), Some(2))));
        assert!(!c.matches(&room(10, None, None)));
    }

    #[test]
    fn equipment_membership() {
        let screen = Ulid::new();
        let mut equipped = room(10, None, None);
        equipped.equipment.insert(screen);
        let c = RoomCriteria::new().equipment(screen);
        assert!(c.matches(&equipped));
        assert!(!c.matches(&room(10, None, None)));
    }

    #[test]
    fn merge_joins_overlapping_and_adjacent() {
        let merged = merge_overlapping(&[w(0, 10), w(5, 15), w(15, 20), w(30, 40)]);
        assert_eq!(merged, vec![w(0, 20), w(30, 40)]);
    }

    #[test]
    fn merge_keeps_the_outer_end_over_contained_windows() {
        let merged = merge_overlapping(&[w(0, 50), w(10, 20), w(30, 40), w(60, 70)]);
        assert_eq!(merged, vec![w(0, 50), w(60, 70)]);
    }

    #[test]
    fn subtract_carves_holes() {
        let free = subtract_windows(&[w(0, 100)], &[w(10, 20), w(50, 60)]);
        assert_eq!(free, vec![w(0, 10), w(20, 50), w(60, 100)]);
    }

    #[test]
    fn subtract_clips_removals_hanging_over_edges() {
        let free = subtract_windows(&[w(10, 100)], &[w(0, 20), w(90, 200)]);
        assert_eq!(free, vec![w(20, 90)]);
    }

    #[test]
    fn subtract_everything_leaves_nothing() {
        assert!(subtract_windows(&[w(10, 20)], &[w(0, 30)]).is_empty());
    }

    #[test]
    fn subtract_nothing_keeps_base() {
        assert_eq!(subtract_windows(&[w(10, 20)], &[]), vec![w(10, 20)]);
    }
}
