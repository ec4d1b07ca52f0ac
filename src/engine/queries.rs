use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::free_spans;
use super::conflict::check_no_conflict;
use super::{Engine, EngineError};

fn validate_window(start: Ms, end: Ms) -> Result<Span, EngineError> {
    if start >= end {
        return Err(EngineError::InvalidDateRange { start, end });
    }
    if end - start > MAX_QUERY_WINDOW_MS {
        return Err(EngineError::LimitExceeded("query window too wide"));
    }
    Ok(Span::new(start, end))
}

impl Engine {
    /// Rooms of the given type with no blocking booking anywhere in the
    /// window and not under maintenance. `exclude` skips one booking id,
    /// for "where else could this stay go" re-planning queries.
    ///
    /// An unknown room type yields an empty list, not an error — the caller
    /// cannot distinguish "no such type" from "fully booked", by design of
    /// the read path being non-authoritative.
    pub async fn find_available_rooms(
        &self,
        room_type_id: Ulid,
        start: Ms,
        end: Ms,
        exclude: Option<Ulid>,
    ) -> Result<Vec<RoomInfo>, EngineError> {
        let span = validate_window(start, end)?;
        let room_ids = self
            .rooms_by_type
            .get(&room_type_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();

        let mut available = Vec::new();
        for rid in room_ids {
            let Some(rs) = self.get_room(&rid) else { continue };
            let guard = rs.read().await;
            if guard.maintenance {
                continue;
            }
            if check_no_conflict(&guard, &span, exclude).is_ok() {
                available.push(RoomInfo {
                    id: guard.id,
                    number: guard.number.clone(),
                    room_type_id: guard.room_type_id,
                    status: guard.status,
                });
            }
        }
        available.sort_by(|a, b| a.number.cmp(&b.number));
        Ok(available)
    }

    /// Free intervals on one room's calendar within the window.
    pub async fn room_calendar(
        &self,
        room_id: Ulid,
        start: Ms,
        end: Ms,
    ) -> Result<Vec<Span>, EngineError> {
        let span = validate_window(start, end)?;
        let rs = match self.get_room(&room_id) {
            Some(rs) => rs,
            None => return Ok(Vec::new()),
        };
        let guard = rs.read().await;
        Ok(free_spans(&guard, &span))
    }

    pub async fn list_rooms(&self) -> Vec<RoomInfo> {
        let room_ids: Vec<Ulid> = self.rooms.iter().map(|e| *e.key()).collect();
        let mut rooms = Vec::with_capacity(room_ids.len());
        for rid in room_ids {
            let Some(rs) = self.get_room(&rid) else { continue };
            let guard = rs.read().await;
            rooms.push(RoomInfo {
                id: guard.id,
                number: guard.number.clone(),
                room_type_id: guard.room_type_id,
                status: guard.status,
            });
        }
        rooms.sort_by(|a, b| a.number.cmp(&b.number));
        rooms
    }

    pub fn list_room_types(&self) -> Vec<RoomType> {
        let mut types: Vec<RoomType> = self.room_types.iter().map(|e| e.value().clone()).collect();
        types.sort_by(|a, b| a.name.cmp(&b.name));
        types
    }

    pub fn get_guest(&self, id: Ulid) -> Option<Guest> {
        self.guests.get(&id).map(|e| e.value().clone())
    }

    pub fn list_guests(&self) -> Vec<Guest> {
        let mut guests: Vec<Guest> = self.guests.iter().map(|e| e.value().clone()).collect();
        guests.sort_by(|a, b| a.name.cmp(&b.name));
        guests
    }

    pub async fn get_booking(&self, id: Ulid) -> Option<Booking> {
        let rid = self.get_room_for_booking(&id)?;
        let rs = self.get_room(&rid)?;
        let guard = rs.read().await;
        guard.booking(id).cloned()
    }

    /// List bookings matching the filter. Archived rows are hidden unless
    /// `include_archived` is set; a direct id lookup always returns the row.
    pub async fn list_bookings(&self, filter: &BookingFilter) -> Vec<Booking> {
        if let Some(id) = filter.id {
            return self.get_booking(id).await.into_iter().collect();
        }

        let room_ids: Vec<Ulid> = match filter.room_id {
            Some(rid) => vec![rid],
            None => self.rooms.iter().map(|e| *e.key()).collect(),
        };

        let mut out = Vec::new();
        for rid in room_ids {
            let Some(rs) = self.get_room(&rid) else { continue };
            let guard = rs.read().await;
            for b in &guard.bookings {
                if b.archived && !filter.include_archived {
                    continue;
                }
                if let Some(gid) = filter.guest_id
                    && b.guest_id != gid {
                        continue;
                    }
                out.push(b.clone());
            }
        }
        out.sort_by_key(|b| (b.span.start, b.id));
        out
    }
}
