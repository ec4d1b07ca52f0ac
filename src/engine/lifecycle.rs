use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{oneshot, RwLock};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_no_conflict, now_ms, validate_range};
use super::{sync, Engine, EngineError, WalCommand};

/// Inputs for a single reservation. Group bookings submit several of these
/// in one all-or-nothing batch.
#[derive(Debug, Clone)]
pub struct ReserveRequest {
    pub id: Ulid,
    pub guest_id: Ulid,
    pub room_id: Ulid,
    pub start: Ms,
    pub end: Ms,
    pub adults: u32,
    pub children: u32,
    pub status: BookingStatus,
    pub source: Option<String>,
    pub notes: Option<String>,
}

impl Engine {
    // ── Inventory ─────────────────────────────────────────

    pub async fn create_room_type(&self, room_type: RoomType) -> Result<(), EngineError> {
        if self.room_types.len() >= MAX_ROOM_TYPES_PER_PROPERTY {
            return Err(EngineError::LimitExceeded("too many room types"));
        }
        if room_type.name.is_empty() || room_type.name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("room type name length"));
        }
        if self.room_types.contains_key(&room_type.id) {
            return Err(EngineError::AlreadyExists(room_type.id));
        }

        let event = Event::RoomTypeCreated { room_type: room_type.clone() };
        self.wal_append(&event).await?;
        self.room_types.insert(room_type.id, room_type);
        Ok(())
    }

    pub async fn delete_room_type(&self, id: Ulid) -> Result<(), EngineError> {
        if !self.room_types.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        if let Some(rooms) = self.rooms_by_type.get(&id)
            && !rooms.is_empty() {
                return Err(EngineError::InUse(id));
            }

        let event = Event::RoomTypeDeleted { id };
        self.wal_append(&event).await?;
        self.room_types.remove(&id);
        Ok(())
    }

    pub async fn create_room(
        &self,
        id: Ulid,
        number: String,
        room_type_id: Ulid,
    ) -> Result<(), EngineError> {
        if self.rooms.len() >= MAX_ROOMS_PER_PROPERTY {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        if number.is_empty() || number.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("room number length"));
        }
        if self.rooms.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if !self.room_types.contains_key(&room_type_id) {
            return Err(EngineError::NotFound(room_type_id));
        }
        if let Some(existing) = self.room_numbers.get(&number) {
            return Err(EngineError::AlreadyExists(*existing.value()));
        }

        let event = Event::RoomCreated { id, number: number.clone(), room_type_id };
        self.wal_append(&event).await?;
        let rs = RoomState::new(id, number.clone(), room_type_id);
        self.rooms.insert(id, Arc::new(RwLock::new(rs)));
        self.room_numbers.insert(number, id);
        self.rooms_by_type.entry(room_type_id).or_default().push(id);
        Ok(())
    }

    /// Delete a room. Refused while any non-cancelled booking references it;
    /// cancelled history is dropped with the room.
    pub async fn delete_room(&self, id: Ulid) -> Result<(), EngineError> {
        let rs = self.get_room(&id).ok_or(EngineError::NotFound(id))?;
        let guard = rs.read().await;
        if guard
            .bookings
            .iter()
            .any(|b| b.status != BookingStatus::Cancelled)
        {
            return Err(EngineError::HasActiveBookings(id));
        }
        let number = guard.number.clone();
        let room_type_id = guard.room_type_id;
        let booking_ids: Vec<Ulid> = guard.bookings.iter().map(|b| b.id).collect();
        drop(guard);

        let event = Event::RoomDeleted { id };
        self.wal_append(&event).await?;
        self.room_numbers.remove(&number);
        if let Some(mut ids) = self.rooms_by_type.get_mut(&room_type_id) {
            ids.retain(|r| r != &id);
        }
        for bid in booking_ids {
            self.idx.booking_to_room.remove(&bid);
        }
        self.rooms.remove(&id);
        self.notify.remove(&id);
        Ok(())
    }

    /// Toggle the maintenance flag. The cached room status is re-derived by
    /// the synchronizer; Maintenance wins over Occupied until cleared.
    pub async fn set_room_maintenance(
        &self,
        id: Ulid,
        on: bool,
        actor: &str,
    ) -> Result<(), EngineError> {
        let rs = self.get_room(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = rs.write().await;
        if guard.maintenance == on {
            return Ok(()); // already in the requested state
        }
        let event = Event::RoomMaintenance { id, on, actor: actor.to_string(), at: now_ms() };
        self.persist_and_apply(id, &mut guard, &event).await
    }

    // ── Guests ────────────────────────────────────────────

    pub async fn create_guest(&self, guest: Guest) -> Result<(), EngineError> {
        if self.guests.len() >= MAX_GUESTS_PER_PROPERTY {
            return Err(EngineError::LimitExceeded("too many guests"));
        }
        if guest.name.is_empty() || guest.name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("guest name length"));
        }
        if self.guests.contains_key(&guest.id) {
            return Err(EngineError::AlreadyExists(guest.id));
        }

        let event = Event::GuestCreated { guest: guest.clone() };
        self.wal_append(&event).await?;
        self.guests.insert(guest.id, guest);
        Ok(())
    }

    /// Update guest contact details and re-derive the denormalized copies
    /// on every booking that references the guest.
    pub async fn update_guest(&self, guest: Guest) -> Result<(), EngineError> {
        if guest.name.is_empty() || guest.name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("guest name length"));
        }
        if !self.guests.contains_key(&guest.id) {
            return Err(EngineError::NotFound(guest.id));
        }

        let event = Event::GuestUpdated { guest: guest.clone() };
        self.wal_append(&event).await?;
        self.guests.insert(guest.id, guest.clone());

        for rid in self.guest_room_ids(&guest.id) {
            if let Some(rs) = self.get_room(&rid) {
                let mut guard = rs.write().await;
                sync::resync_guest(&mut guard, &guest);
            }
        }
        Ok(())
    }

    /// Delete a guest. Refused while the guest has any non-terminal booking.
    pub async fn delete_guest(&self, id: Ulid) -> Result<(), EngineError> {
        if !self.guests.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        let booking_ids = self
            .idx
            .guest_bookings
            .get(&id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        for bid in &booking_ids {
            if let Some(rid) = self.get_room_for_booking(bid)
                && let Some(rs) = self.get_room(&rid) {
                    let guard = rs.read().await;
                    if let Some(b) = guard.booking(*bid)
                        && !b.status.is_terminal() {
                            return Err(EngineError::HasActiveBookings(id));
                        }
                }
        }

        let event = Event::GuestDeleted { id };
        self.wal_append(&event).await?;
        self.guests.remove(&id);
        Ok(())
    }

    fn guest_room_ids(&self, guest_id: &Ulid) -> Vec<Ulid> {
        let booking_ids = self
            .idx
            .guest_bookings
            .get(guest_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        let mut room_ids: Vec<Ulid> = booking_ids
            .iter()
            .filter_map(|b| self.get_room_for_booking(b))
            .collect();
        room_ids.sort();
        room_ids.dedup();
        room_ids
    }

    // ── Reservations ──────────────────────────────────────

    /// Reserve a room for a stay. Validation, the conflict check, the WAL
    /// append and the in-memory insert all happen under the room's write
    /// lock: the first writer to commit wins, the loser gets `Conflict`.
    pub async fn reserve(&self, req: ReserveRequest) -> Result<Booking, EngineError> {
        let span = validate_range(req.start, req.end)?;
        let rs = self
            .get_room(&req.room_id)
            .ok_or(EngineError::NotFound(req.room_id))?;
        let mut guard = rs.write().await;
        self.check_room_writable(&guard)?;
        check_no_conflict(&guard, &span, None)?;

        let booking = self.build_booking(&req, span, &guard, now_ms())?;
        let event = Event::BookingReserved { booking: booking.clone() };
        self.persist_and_apply(req.room_id, &mut guard, &event).await?;
        Ok(booking)
    }

    /// Atomically reserve several rooms (a group booking). All-or-nothing:
    /// if any request conflicts — against existing bookings or within the
    /// batch itself — none are committed.
    pub async fn reserve_many(
        &self,
        requests: Vec<ReserveRequest>,
    ) -> Result<Vec<Booking>, EngineError> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }
        if requests.len() > MAX_BATCH_SIZE {
            return Err(EngineError::LimitExceeded("batch too large"));
        }
        let mut spans = Vec::with_capacity(requests.len());
        let mut batch_ids = HashSet::with_capacity(requests.len());
        for req in &requests {
            // build_booking only sees committed ids, so repeats within the
            // batch must be caught here.
            if !batch_ids.insert(req.id) {
                return Err(EngineError::AlreadyExists(req.id));
            }
            spans.push(validate_range(req.start, req.end)?);
        }

        // Acquire write locks in sorted order to prevent deadlocks.
        let mut room_ids: Vec<Ulid> = requests.iter().map(|r| r.room_id).collect();
        room_ids.sort();
        room_ids.dedup();

        let mut guards = Vec::with_capacity(room_ids.len());
        let mut rs_map = HashMap::new();
        for rid in &room_ids {
            let rs = self.get_room(rid).ok_or(EngineError::NotFound(*rid))?;
            let guard = rs.write_owned().await;
            self.check_room_writable(&guard)?;
            rs_map.insert(*rid, guards.len());
            guards.push(guard);
        }

        // Phase 1: validate every request against current state + intra-batch.
        let now = now_ms();
        let mut by_room: HashMap<Ulid, Vec<(Ulid, Span)>> = HashMap::new();
        for (req, span) in requests.iter().zip(&spans) {
            by_room.entry(req.room_id).or_default().push((req.id, *span));
        }
        for (rid, batch) in &by_room {
            let guard = &guards[rs_map[rid]];
            for (_, span) in batch {
                check_no_conflict(guard, span, None)?;
            }
            for i in 0..batch.len() {
                for j in (i + 1)..batch.len() {
                    if batch[i].1.overlaps(&batch[j].1) {
                        return Err(EngineError::Conflict(batch[i].0));
                    }
                }
            }
        }
        let mut bookings = Vec::with_capacity(requests.len());
        for (req, span) in requests.iter().zip(&spans) {
            let guard = &guards[rs_map[&req.room_id]];
            bookings.push(self.build_booking(req, *span, guard, now)?);
        }

        // Phase 2: all validated — commit everything.
        for booking in &bookings {
            let event = Event::BookingReserved { booking: booking.clone() };
            let guard = &mut guards[rs_map[&booking.room_id]];
            self.persist_and_apply(booking.room_id, guard, &event).await?;
        }

        Ok(bookings)
    }

    fn check_room_writable(&self, rs: &RoomState) -> Result<(), EngineError> {
        if rs.maintenance {
            return Err(EngineError::UnderMaintenance(rs.id));
        }
        if rs.bookings.len() >= MAX_BOOKINGS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many bookings on room"));
        }
        Ok(())
    }

    /// Validate request fields and assemble the full booking record,
    /// denormalized copies included. No side effects.
    fn build_booking(
        &self,
        req: &ReserveRequest,
        span: Span,
        rs: &RoomState,
        now: Ms,
    ) -> Result<Booking, EngineError> {
        if !matches!(req.status, BookingStatus::Pending | BookingStatus::Confirmed) {
            return Err(EngineError::InvalidStateTransition {
                from: BookingStatus::Pending,
                requested: req.status,
            });
        }
        if let Some(ref n) = req.notes
            && n.len() > MAX_NOTES_LEN {
                return Err(EngineError::LimitExceeded("notes too long"));
            }
        if self.idx.booking_to_room.contains_key(&req.id) {
            return Err(EngineError::AlreadyExists(req.id));
        }
        let guest = self
            .guests
            .get(&req.guest_id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(req.guest_id))?;
        let room_type = self
            .room_types
            .get(&rs.room_type_id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(rs.room_type_id))?;
        if req.adults == 0 || req.adults > room_type.max_adults {
            return Err(EngineError::LimitExceeded("adults exceed room capacity"));
        }
        if req.children > room_type.max_children {
            return Err(EngineError::LimitExceeded("children exceed room capacity"));
        }

        let nights = span.nights();
        let id_str = req.id.to_string();
        Ok(Booking {
            id: req.id,
            // Human-facing code: last 8 chars of the ulid are the random tail.
            reference: format!("BK-{}", &id_str[id_str.len() - 8..]),
            guest_id: req.guest_id,
            room_id: rs.id,
            room_type_id: rs.room_type_id,
            span,
            adults: req.adults,
            children: req.children,
            total_amount: room_type.base_rate * nights as i64,
            status: req.status,
            payment_status: PaymentStatus::Unpaid,
            source: req.source.clone(),
            notes: req.notes.clone(),
            seq: 0,
            created_at: now,
            updated_at: now,
            archived: false,
            archived_at: None,
            archived_reason: None,
            guest_name: guest.name,
            guest_email: guest.email,
            guest_phone: guest.phone,
            room_number: rs.number.clone(),
            room_type_name: room_type.name,
            nights,
        })
    }

    // ── Lifecycle transitions ─────────────────────────────

    /// Drive a booking through the state machine. The legal moves:
    ///
    ///   Pending   → Confirmed | Cancelled
    ///   Confirmed → InHouse   | Cancelled
    ///   InHouse   → CheckedOut
    ///
    /// Everything else is `InvalidStateTransition`. `expected_seq`, when
    /// given, is a compare-and-set against the booking's current version.
    pub async fn transition_booking(
        &self,
        id: Ulid,
        requested: BookingStatus,
        actor: &str,
        expected_seq: Option<u64>,
    ) -> Result<Booking, EngineError> {
        let (room_id, mut guard) = self.resolve_booking_write(&id).await?;
        let b = guard.booking(id).ok_or(EngineError::NotFound(id))?;
        let from = b.status;
        let seq = b.seq;
        let span = b.span;

        if let Some(expected) = expected_seq
            && expected != seq {
                return Err(EngineError::StaleWrite { expected, actual: seq });
            }

        let legal = matches!(
            (from, requested),
            (BookingStatus::Pending, BookingStatus::Confirmed)
                | (BookingStatus::Pending, BookingStatus::Cancelled)
                | (BookingStatus::Confirmed, BookingStatus::InHouse)
                | (BookingStatus::Confirmed, BookingStatus::Cancelled)
                | (BookingStatus::InHouse, BookingStatus::CheckedOut)
        );
        if !legal {
            return Err(EngineError::InvalidStateTransition { from, requested });
        }

        let now = now_ms();
        if requested == BookingStatus::InHouse {
            if guard.maintenance {
                return Err(EngineError::UnderMaintenance(room_id));
            }
            if !span.contains_instant(now) {
                return Err(EngineError::OutsideStayWindow { now, span });
            }
            if let Some(other) = guard
                .bookings
                .iter()
                .find(|b| b.status == BookingStatus::InHouse)
            {
                return Err(EngineError::RoomOccupied(other.id));
            }
        }

        let next_seq = seq + 1;
        let actor = actor.to_string();
        let event = match requested {
            BookingStatus::Confirmed => Event::BookingConfirmed { id, seq: next_seq, actor, at: now },
            BookingStatus::InHouse => Event::BookingCheckedIn { id, seq: next_seq, actor, at: now },
            BookingStatus::CheckedOut => Event::BookingCheckedOut { id, seq: next_seq, actor, at: now },
            BookingStatus::Cancelled => Event::BookingCancelled { id, seq: next_seq, actor, at: now },
            BookingStatus::Pending => unreachable!("no transition targets Pending"),
        };
        self.persist_and_apply(room_id, &mut guard, &event).await?;
        Ok(guard.booking(id).cloned().expect("booking present after apply"))
    }

    pub async fn confirm(&self, id: Ulid, actor: &str, seq: Option<u64>) -> Result<Booking, EngineError> {
        self.transition_booking(id, BookingStatus::Confirmed, actor, seq).await
    }

    pub async fn check_in(&self, id: Ulid, actor: &str, seq: Option<u64>) -> Result<Booking, EngineError> {
        self.transition_booking(id, BookingStatus::InHouse, actor, seq).await
    }

    pub async fn check_out(&self, id: Ulid, actor: &str, seq: Option<u64>) -> Result<Booking, EngineError> {
        self.transition_booking(id, BookingStatus::CheckedOut, actor, seq).await
    }

    pub async fn cancel(&self, id: Ulid, actor: &str, seq: Option<u64>) -> Result<Booking, EngineError> {
        self.transition_booking(id, BookingStatus::Cancelled, actor, seq).await
    }

    // ── Archival sweep ────────────────────────────────────

    /// Archive every terminal booking whose last transition is older than the
    /// retention window. Already-archived rows are skipped, so re-running the
    /// sweep over the same data is a no-op. Returns the number archived.
    pub async fn archive_eligible(&self, now: Ms, retention_ms: Ms) -> Result<usize, EngineError> {
        let room_ids: Vec<Ulid> = self.rooms.iter().map(|e| *e.key()).collect();
        let mut archived = 0usize;
        for rid in room_ids {
            let Some(rs) = self.get_room(&rid) else { continue };
            let mut guard = rs.write().await;
            let eligible: Vec<Ulid> = guard
                .bookings
                .iter()
                .filter(|b| {
                    b.status.is_terminal() && !b.archived && b.updated_at + retention_ms <= now
                })
                .map(|b| b.id)
                .collect();
            for id in eligible {
                let event = Event::BookingArchived { id, at: now, reason: "retention".into() };
                self.persist_and_apply(rid, &mut guard, &event).await?;
                archived += 1;
            }
        }
        if archived > 0 {
            metrics::counter!(crate::observability::BOOKINGS_ARCHIVED_TOTAL)
                .increment(archived as u64);
        }
        Ok(archived)
    }

    // ── WAL compaction ────────────────────────────────────

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate current state. `BookingReserved` carries the full record,
    /// so one event per booking captures status, seq and archival flags.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        for entry in self.room_types.iter() {
            events.push(Event::RoomTypeCreated { room_type: entry.value().clone() });
        }
        for entry in self.guests.iter() {
            events.push(Event::GuestCreated { guest: entry.value().clone() });
        }

        let room_ids: Vec<Ulid> = self.rooms.iter().map(|e| *e.key()).collect();
        for rid in room_ids {
            let Some(rs) = self.get_room(&rid) else { continue };
            let guard = rs.read().await;
            events.push(Event::RoomCreated {
                id: guard.id,
                number: guard.number.clone(),
                room_type_id: guard.room_type_id,
            });
            if guard.maintenance {
                events.push(Event::RoomMaintenance {
                    id: guard.id,
                    on: true,
                    actor: "compaction".into(),
                    at: now_ms(),
                });
            }
            for b in &guard.bookings {
                events.push(Event::BookingReserved { booking: b.clone() });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::StorageUnavailable("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::StorageUnavailable("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::StorageUnavailable(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
