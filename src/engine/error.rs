use ulid::Ulid;

use crate::model::{BookingStatus, Ms, Span};

/// Everything here is recoverable by the caller: retry with corrected
/// input, re-fetch availability, or surface to the end user. Rejected
/// operations never partially apply.
#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// The requested interval overlaps an existing non-cancelled booking.
    Conflict(Ulid),
    InvalidDateRange {
        start: Ms,
        end: Ms,
    },
    InvalidStateTransition {
        from: BookingStatus,
        requested: BookingStatus,
    },
    /// Compare-and-set failed: someone else transitioned the booking first.
    StaleWrite {
        expected: u64,
        actual: u64,
    },
    /// Check-in attempted while another booking is InHouse on the room.
    RoomOccupied(Ulid),
    /// Check-in attempted outside the stay window.
    OutsideStayWindow {
        now: Ms,
        span: Span,
    },
    /// Direct reservation on a room currently under maintenance.
    UnderMaintenance(Ulid),
    /// Deletion blocked by non-cancelled bookings.
    HasActiveBookings(Ulid),
    /// Deletion blocked because rooms still reference the record.
    InUse(Ulid),
    LimitExceeded(&'static str),
    /// WAL append/compact failed. The engine does not retry; retry policy
    /// belongs to the caller.
    StorageUnavailable(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Conflict(id) => write!(f, "conflict with booking: {id}"),
            EngineError::InvalidDateRange { start, end } => {
                write!(f, "invalid date range: [{start}, {end})")
            }
            EngineError::InvalidStateTransition { from, requested } => {
                write!(
                    f,
                    "invalid state transition: {} -> {}",
                    from.as_str(),
                    requested.as_str()
                )
            }
            EngineError::StaleWrite { expected, actual } => {
                write!(f, "stale write: expected seq {expected}, booking is at {actual}")
            }
            EngineError::RoomOccupied(id) => {
                write!(f, "room {id} is occupied by another booking")
            }
            EngineError::OutsideStayWindow { now, span } => {
                write!(
                    f,
                    "check-in at {now} outside stay window [{}, {})",
                    span.start, span.end
                )
            }
            EngineError::UnderMaintenance(id) => {
                write!(f, "room {id} is under maintenance")
            }
            EngineError::HasActiveBookings(id) => {
                write!(f, "cannot delete {id}: has non-cancelled bookings")
            }
            EngineError::InUse(id) => write!(f, "cannot delete {id}: still referenced"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::StorageUnavailable(e) => write!(f, "storage unavailable: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
