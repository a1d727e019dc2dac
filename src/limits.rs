use crate::model::Ms;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;
/// A single reservation may not run longer than 30 days.
pub const MAX_WINDOW_DURATION_MS: Ms = 30 * 24 * 3_600_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_TEXT_LEN: usize = 500;
pub const MAX_REASON_LEN: usize = 500;
pub const MAX_EQUIPMENT_PER_ROOM: usize = 64;

pub const MAX_PAGE_SIZE: usize = 1_000;
