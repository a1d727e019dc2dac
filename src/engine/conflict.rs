use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// First confirmed reservation in `existing` that overlaps `window`,
/// skipping `ignore` (the reservation being edited, if any).
pub fn find_conflict<'a>(
    existing: impl IntoIterator<Item = &'a Reservation>,
    window: &Window,
    ignore: Option<Ulid>,
) -> Option<&'a Reservation> {
    existing
        .into_iter()
        .filter(|r| ignore != Some(r.id))
        .find(|r| r.blocks(window))
}

pub(crate) fn check_no_conflict(
    room_id: Ulid,
    existing: &[Reservation],
    window: &Window,
    ignore: Option<Ulid>,
) -> Result<(), EngineError> {
    match find_conflict(existing.iter().filter(|r| r.room_id == room_id), window, ignore) {
        Some(hit) => Err(EngineError::Conflict {
            room_id,
            reservation_id: hit.id,
        }),
        None => Ok(()),
    }
}

/// Range and length limits. `Window` itself guarantees `start < end`.
pub(crate) fn validate_window(window: &Window) -> Result<(), EngineError> {
    if window.start() < MIN_VALID_TIMESTAMP_MS || window.end() > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if window.duration_ms() > MAX_WINDOW_DURATION_MS {
        return Err(EngineError::LimitExceeded("window too long"));
    }
    Ok(())
}

pub(crate) fn validate_reason(reason: Option<&str>) -> Result<(), EngineError> {
    if reason.is_some_and(|r| r.chars().count() > MAX_REASON_LEN) {
        return Err(EngineError::LimitExceeded("reason too long"));
    }
    Ok(())
}

pub(crate) fn validate_name(field: &str, value: &str) -> Result<(), EngineError> {
    if value.trim().is_empty() {
        return Err(EngineError::Validation(format!("{field} is required")));
    }
    if value.chars().count() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(())
}

pub(crate) fn validate_room(room: &Room) -> Result<(), EngineError> {
    validate_name("room name", &room.name)?;
    if room.capacity < 1 {
        return Err(EngineError::Validation(
            "room capacity must be at least 1".into(),
        ));
    }
    if room
        .description
        .as_deref()
        .is_some_and(|d| d.chars().count() > MAX_TEXT_LEN)
    {
        return Err(EngineError::LimitExceeded("description too long"));
    }
    if room.equipment.len() > MAX_EQUIPMENT_PER_ROOM {
        return Err(EngineError::LimitExceeded("too much equipment on room"));
    }
    Ok(())
}
