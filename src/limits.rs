//! Hard limits. Everything here bounds memory or WAL growth per property;
//! exceeding one fails the request with `LimitExceeded`, never a panic.

use crate::model::{Ms, DAY_MS};

pub const MAX_ROOM_TYPES_PER_PROPERTY: usize = 500;
pub const MAX_ROOMS_PER_PROPERTY: usize = 10_000;
pub const MAX_GUESTS_PER_PROPERTY: usize = 500_000;
pub const MAX_BOOKINGS_PER_ROOM: usize = 10_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_NOTES_LEN: usize = 2_000;
pub const MAX_BATCH_SIZE: usize = 100;

/// 2000-01-01T00:00:00Z — bookings before this are garbage input.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// Longest single stay: one year.
pub const MAX_STAY_DURATION_MS: Ms = 366 * DAY_MS;
/// Widest availability/calendar query window: two years.
pub const MAX_QUERY_WINDOW_MS: Ms = 2 * 366 * DAY_MS;

pub const MAX_PROPERTY_NAME_LEN: usize = 256;
pub const MAX_PROPERTIES: usize = 256;
