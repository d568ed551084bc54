use crate::model::Ms;

pub const MAX_RESOURCES: usize = 10_000;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_HOLDER_LEN: usize = 256;
pub const MAX_NOTES_LEN: usize = 4096;
pub const MAX_SEARCH_TERM_LEN: usize = 256;
pub const MAX_RESERVATIONS_PER_RESOURCE: usize = 100_000;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// A single reservation may not span more than 366 days.
pub const MAX_SPAN_DURATION_MS: Ms = 366 * 24 * 3_600_000;
/// Range queries are capped at ~2 years.
pub const MAX_QUERY_WINDOW_MS: Ms = 2 * 366 * 24 * 3_600_000;
