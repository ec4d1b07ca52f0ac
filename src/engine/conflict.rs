use ulid::Ulid;

use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

/// Validate a raw stay range before a `Span` is ever constructed.
/// `start >= end` is the caller's error, not a limit.
pub(crate) fn validate_range(start: Ms, end: Ms) -> Result<Span, EngineError> {
    use crate::limits::*;
    if start >= end {
        return Err(EngineError::InvalidDateRange { start, end });
    }
    if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    let span = Span::new(start, end);
    if span.duration_ms() > MAX_STAY_DURATION_MS {
        return Err(EngineError::LimitExceeded("stay too long"));
    }
    Ok(span)
}

/// The Conflict Guard's overlap check, scoped to a single room. Must run
/// while holding the room's write lock, immediately before the insert —
/// the first writer to commit wins, the loser gets `Conflict` and must
/// re-query availability rather than retry blindly.
///
/// `exclude` skips one booking id, used when modifying an existing booking.
pub(crate) fn check_no_conflict(
    room: &RoomState,
    span: &Span,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    for b in room.overlapping(span) {
        if b.status.blocks_availability() && exclude != Some(b.id) {
            return Err(EngineError::Conflict(b.id));
        }
    }
    Ok(())
}
