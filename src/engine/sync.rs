//! Status Synchronizer: the single place room state is mutated by events.
//!
//! Every committed event flows through `apply_to_room`, both on the live
//! write path and on WAL replay. Transition events carry the booking's
//! post-transition seq; an event whose seq is not exactly `booking.seq + 1`
//! is skipped, so replaying the same event twice never double-toggles
//! room status or payment state.

use dashmap::DashMap;
use ulid::Ulid;

use crate::model::*;

/// Shared reverse indexes the synchronizer maintains alongside room state.
pub(crate) struct Indexes {
    /// booking id → room id
    pub booking_to_room: DashMap<Ulid, Ulid>,
    /// guest id → booking ids (for denormalized-field re-derivation)
    pub guest_bookings: DashMap<Ulid, Vec<Ulid>>,
}

impl Indexes {
    pub fn new() -> Self {
        Self {
            booking_to_room: DashMap::new(),
            guest_bookings: DashMap::new(),
        }
    }
}

/// Apply an event directly to a RoomState (no locking — caller holds the lock).
pub(super) fn apply_to_room(rs: &mut RoomState, event: &Event, idx: &Indexes) {
    match event {
        Event::BookingReserved { booking } => {
            idx.booking_to_room.insert(booking.id, booking.room_id);
            idx.guest_bookings
                .entry(booking.guest_id)
                .or_default()
                .push(booking.id);
            rs.insert_booking(booking.clone());
            recompute_room_status(rs);
        }
        Event::BookingConfirmed { id, seq, at, .. } => {
            if let Some(b) = guarded(rs, *id, *seq) {
                b.status = BookingStatus::Confirmed;
                b.payment_status = PaymentStatus::Paid;
                b.seq = *seq;
                b.updated_at = *at;
            }
        }
        Event::BookingCheckedIn { id, seq, at, .. } => {
            if let Some(b) = guarded(rs, *id, *seq) {
                b.status = BookingStatus::InHouse;
                b.seq = *seq;
                b.updated_at = *at;
                recompute_room_status(rs);
            }
        }
        Event::BookingCheckedOut { id, seq, at, .. } => {
            if let Some(b) = guarded(rs, *id, *seq) {
                b.status = BookingStatus::CheckedOut;
                b.seq = *seq;
                b.updated_at = *at;
                recompute_room_status(rs);
            }
        }
        Event::BookingCancelled { id, seq, at, .. } => {
            if let Some(b) = guarded(rs, *id, *seq) {
                b.status = BookingStatus::Cancelled;
                b.seq = *seq;
                b.updated_at = *at;
                recompute_room_status(rs);
            }
        }
        Event::BookingArchived { id, at, reason } => {
            // Idempotent by flag, not by seq: archiving is orthogonal to
            // the lifecycle and does not bump the version.
            if let Some(b) = rs.booking_mut(*id)
                && !b.archived {
                    b.archived = true;
                    b.archived_at = Some(*at);
                    b.archived_reason = Some(reason.clone());
                }
        }
        Event::RoomMaintenance { on, .. } => {
            rs.maintenance = *on;
            recompute_room_status(rs);
        }
        // Inventory/guest events are handled at the map level, not here.
        Event::RoomTypeCreated { .. }
        | Event::RoomTypeDeleted { .. }
        | Event::RoomCreated { .. }
        | Event::RoomDeleted { .. }
        | Event::GuestCreated { .. }
        | Event::GuestUpdated { .. }
        | Event::GuestDeleted { .. } => {}
    }
}

/// Seq guard: a transition event applies only when it is the next version.
fn guarded(rs: &mut RoomState, id: Ulid, seq: u64) -> Option<&mut Booking> {
    rs.booking_mut(id).filter(|b| b.seq + 1 == seq)
}

/// Re-derive the cached room status from booking state.
/// Occupied iff exactly one InHouse booking; Maintenance wins over both.
pub(super) fn recompute_room_status(rs: &mut RoomState) {
    rs.status = derived_room_status(rs);
}

/// The status a room *should* have, derived from scratch. Used by tests
/// and consistency checks to prove the cached column never drifts.
pub fn derived_room_status(rs: &RoomState) -> RoomStatus {
    if rs.maintenance {
        RoomStatus::Maintenance
    } else if rs
        .bookings
        .iter()
        .any(|b| b.status == BookingStatus::InHouse)
    {
        RoomStatus::Occupied
    } else {
        RoomStatus::Available
    }
}

/// Re-derive denormalized guest fields on every booking of this guest
/// present in the given room.
pub(super) fn resync_guest(rs: &mut RoomState, guest: &Guest) {
    for b in rs.bookings.iter_mut().filter(|b| b.guest_id == guest.id) {
        b.guest_name = guest.name.clone();
        b.guest_email = guest.email.clone();
        b.guest_phone = guest.phone.clone();
    }
}
