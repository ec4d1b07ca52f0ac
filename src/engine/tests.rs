use super::conflict::{now_ms, validate_range};
use super::*;

const D: Ms = DAY_MS;
const H: Ms = 3_600_000; // 1 hour in ms

/// Fixed base instant for date-range tests: well inside the valid window.
const T0: Ms = 1_750_000_000_000;

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("frontdesk_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn new_engine(name: &str) -> Engine {
    Engine::new(test_wal_path(name), Arc::new(NotifyHub::new())).unwrap()
}

async fn seed(engine: &Engine) -> (Ulid, Ulid, Ulid) {
    let room_type_id = Ulid::new();
    let room_id = Ulid::new();
    let guest_id = Ulid::new();
    engine
        .create_room_type(RoomType {
            id: room_type_id,
            name: "Standard".into(),
            base_rate: 10_000,
            max_adults: 2,
            max_children: 2,
            bed_type: Some("Queen".into()),
        })
        .await
        .unwrap();
    engine.create_room(room_id, "101".into(), room_type_id).await.unwrap();
    engine
        .create_guest(Guest {
            id: guest_id,
            name: "Ada Lovelace".into(),
            email: Some("ada@example.com".into()),
            phone: None,
        })
        .await
        .unwrap();
    (room_type_id, room_id, guest_id)
}

fn req(room_id: Ulid, guest_id: Ulid, start: Ms, end: Ms) -> ReserveRequest {
    ReserveRequest {
        id: Ulid::new(),
        guest_id,
        room_id,
        start,
        end,
        adults: 2,
        children: 0,
        status: BookingStatus::Confirmed,
        source: None,
        notes: None,
    }
}

async fn room_status(engine: &Engine, room_id: Ulid) -> RoomStatus {
    let rs = engine.get_room(&room_id).unwrap();
    let guard = rs.read().await;
    assert_eq!(guard.status, derived_room_status(&guard));
    guard.status
}

// ── Reservations and the conflict guard ──────────────────

#[tokio::test]
async fn reserve_and_get_booking() {
    let engine = new_engine("reserve_get.wal");
    let (_, room, guest) = seed(&engine).await;

    let r = req(room, guest, T0, T0 + 3 * D);
    let booking = engine.reserve(r.clone()).await.unwrap();
    assert!(booking.reference.starts_with("BK-"));
    assert_eq!(booking.nights, 3);
    assert_eq!(booking.total_amount, 30_000);
    assert_eq!(booking.seq, 0);
    assert_eq!(booking.guest_name, "Ada Lovelace");
    assert_eq!(booking.room_number, "101");

    let fetched = engine.get_booking(r.id).await.unwrap();
    assert_eq!(fetched, booking);
}

#[tokio::test]
async fn overlapping_reserve_rejected_adjacent_allowed() {
    let engine = new_engine("adjacency.wal");
    let (_, room, guest) = seed(&engine).await;

    engine.reserve(req(room, guest, T0 + 10 * D, T0 + 12 * D)).await.unwrap();

    // [11, 13) overlaps [10, 12)
    let err = engine.reserve(req(room, guest, T0 + 11 * D, T0 + 13 * D)).await;
    assert!(matches!(err, Err(EngineError::Conflict(_))));

    // [12, 14) is back-to-back with [10, 12) — checkout day is free
    engine.reserve(req(room, guest, T0 + 12 * D, T0 + 14 * D)).await.unwrap();
}

#[tokio::test]
async fn invalid_date_range_rejected() {
    let engine = new_engine("bad_range.wal");
    let (_, room, guest) = seed(&engine).await;

    for (start, end) in [(T0, T0), (T0 + D, T0)] {
        let err = engine.reserve(req(room, guest, start, end)).await;
        assert!(matches!(err, Err(EngineError::InvalidDateRange { .. })));
    }
}

#[tokio::test]
async fn range_limits_enforced() {
    assert!(matches!(
        validate_range(100, 200),
        Err(EngineError::LimitExceeded(_))
    )); // before year 2000
    assert!(matches!(
        validate_range(T0, T0 + 400 * D),
        Err(EngineError::LimitExceeded(_))
    )); // stay longer than a year
    assert!(validate_range(T0, T0 + 7 * D).is_ok());
}

#[tokio::test]
async fn reserve_unknown_room_or_guest_fails() {
    let engine = new_engine("unknown_refs.wal");
    let (_, room, guest) = seed(&engine).await;

    let err = engine.reserve(req(Ulid::new(), guest, T0, T0 + D)).await;
    assert!(matches!(err, Err(EngineError::NotFound(_))));

    let err = engine.reserve(req(room, Ulid::new(), T0, T0 + D)).await;
    assert!(matches!(err, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn occupancy_limits_enforced() {
    let engine = new_engine("occupancy.wal");
    let (_, room, guest) = seed(&engine).await;

    let mut r = req(room, guest, T0, T0 + D);
    r.adults = 3; // room type caps at 2
    let err = engine.reserve(r).await;
    assert!(matches!(err, Err(EngineError::LimitExceeded(_))));
}

#[tokio::test]
async fn concurrent_reserve_exactly_one_wins() {
    let engine = new_engine("concurrent.wal");
    let (_, room, guest) = seed(&engine).await;

    let a = req(room, guest, T0, T0 + 2 * D);
    let b = req(room, guest, T0 + D, T0 + 3 * D);
    let (ra, rb) = tokio::join!(engine.reserve(a), engine.reserve(b));
    assert_eq!(
        ra.is_ok() as u8 + rb.is_ok() as u8,
        1,
        "exactly one of two overlapping reserves must win"
    );
    assert_eq!(engine.list_bookings(&BookingFilter::default()).await.len(), 1);
}

#[tokio::test]
async fn pending_booking_blocks_availability() {
    let engine = new_engine("pending_blocks.wal");
    let (room_type, room, guest) = seed(&engine).await;

    let mut r = req(room, guest, T0, T0 + 2 * D);
    r.status = BookingStatus::Pending;
    engine.reserve(r).await.unwrap();

    let err = engine.reserve(req(room, guest, T0 + D, T0 + 3 * D)).await;
    assert!(matches!(err, Err(EngineError::Conflict(_))));

    let available = engine
        .find_available_rooms(room_type, T0, T0 + 2 * D, None)
        .await
        .unwrap();
    assert!(available.is_empty());
}

#[tokio::test]
async fn cancelled_booking_frees_the_span() {
    let engine = new_engine("cancel_frees.wal");
    let (_, room, guest) = seed(&engine).await;

    let r = req(room, guest, T0, T0 + 2 * D);
    engine.reserve(r.clone()).await.unwrap();
    engine.cancel(r.id, "frontdesk", None).await.unwrap();

    // Same span is reservable again; cancelled row stays in the listing.
    engine.reserve(req(room, guest, T0, T0 + 2 * D)).await.unwrap();
    let bookings = engine.list_bookings(&BookingFilter::default()).await;
    assert_eq!(bookings.len(), 2);
    assert!(bookings.iter().any(|b| b.status == BookingStatus::Cancelled));
}

#[tokio::test]
async fn cannot_reserve_with_terminal_initial_status() {
    let engine = new_engine("bad_initial.wal");
    let (_, room, guest) = seed(&engine).await;

    let mut r = req(room, guest, T0, T0 + D);
    r.status = BookingStatus::InHouse;
    let err = engine.reserve(r).await;
    assert!(matches!(err, Err(EngineError::InvalidStateTransition { .. })));
}

// ── Lifecycle state machine ──────────────────────────────

#[tokio::test]
async fn full_lifecycle_drives_room_status() {
    let engine = new_engine("lifecycle.wal");
    let (_, room, guest) = seed(&engine).await;

    let now = now_ms();
    let mut r = req(room, guest, now - H, now + 2 * H);
    r.status = BookingStatus::Pending;
    let id = r.id;
    engine.reserve(r).await.unwrap();
    assert_eq!(room_status(&engine, room).await, RoomStatus::Available);

    let b = engine.confirm(id, "frontdesk", None).await.unwrap();
    assert_eq!(b.status, BookingStatus::Confirmed);
    assert_eq!(b.payment_status, PaymentStatus::Paid);
    assert_eq!(b.seq, 1);
    assert_eq!(room_status(&engine, room).await, RoomStatus::Available);

    let b = engine.check_in(id, "frontdesk", None).await.unwrap();
    assert_eq!(b.status, BookingStatus::InHouse);
    assert_eq!(room_status(&engine, room).await, RoomStatus::Occupied);

    let b = engine.check_out(id, "frontdesk", None).await.unwrap();
    assert_eq!(b.status, BookingStatus::CheckedOut);
    assert_eq!(b.seq, 3);
    assert_eq!(room_status(&engine, room).await, RoomStatus::Available);
}

#[tokio::test]
async fn check_in_pending_booking_fails() {
    let engine = new_engine("checkin_pending.wal");
    let (_, room, guest) = seed(&engine).await;

    let now = now_ms();
    let mut r = req(room, guest, now - H, now + 2 * H);
    r.status = BookingStatus::Pending;
    let id = r.id;
    engine.reserve(r).await.unwrap();

    let err = engine.check_in(id, "frontdesk", None).await;
    assert!(matches!(
        err,
        Err(EngineError::InvalidStateTransition {
            from: BookingStatus::Pending,
            requested: BookingStatus::InHouse,
        })
    ));
    assert_eq!(room_status(&engine, room).await, RoomStatus::Available);
}

#[tokio::test]
async fn check_out_without_check_in_fails() {
    let engine = new_engine("checkout_direct.wal");
    let (_, room, guest) = seed(&engine).await;

    let r = req(room, guest, T0, T0 + D);
    let id = r.id;
    engine.reserve(r).await.unwrap();

    let err = engine.check_out(id, "frontdesk", None).await;
    assert!(matches!(err, Err(EngineError::InvalidStateTransition { .. })));
}

#[tokio::test]
async fn cancel_in_house_fails() {
    let engine = new_engine("cancel_inhouse.wal");
    let (_, room, guest) = seed(&engine).await;

    let now = now_ms();
    let r = req(room, guest, now - H, now + 2 * H);
    let id = r.id;
    engine.reserve(r).await.unwrap();
    engine.check_in(id, "frontdesk", None).await.unwrap();

    let err = engine.cancel(id, "frontdesk", None).await;
    assert!(matches!(err, Err(EngineError::InvalidStateTransition { .. })));
}

#[tokio::test]
async fn terminal_states_reject_further_transitions() {
    let engine = new_engine("terminal.wal");
    let (_, room, guest) = seed(&engine).await;

    let r = req(room, guest, T0, T0 + D);
    let id = r.id;
    engine.reserve(r).await.unwrap();
    engine.cancel(id, "frontdesk", None).await.unwrap();

    let err = engine.cancel(id, "frontdesk", None).await;
    assert!(matches!(err, Err(EngineError::InvalidStateTransition { .. })));
    let err = engine.confirm(id, "frontdesk", None).await;
    assert!(matches!(err, Err(EngineError::InvalidStateTransition { .. })));
}

#[tokio::test]
async fn check_in_outside_stay_window_fails() {
    let engine = new_engine("checkin_window.wal");
    let (_, room, guest) = seed(&engine).await;

    let r = req(room, guest, T0 + 100 * D, T0 + 102 * D);
    let id = r.id;
    engine.reserve(r).await.unwrap();

    let err = engine.check_in(id, "frontdesk", None).await;
    assert!(matches!(err, Err(EngineError::OutsideStayWindow { .. })));
}

#[tokio::test]
async fn check_in_while_previous_guest_overstays_fails() {
    let engine = new_engine("overstay.wal");
    let (_, room, guest) = seed(&engine).await;

    // Guest A's stay ends 500ms from now; they check in and overstay.
    let now = now_ms();
    let a = req(room, guest, now - H, now + 500);
    engine.reserve(a.clone()).await.unwrap();
    engine.check_in(a.id, "frontdesk", None).await.unwrap();

    let b = req(room, guest, now + 500, now + H);
    engine.reserve(b.clone()).await.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(700)).await;
    let err = engine.check_in(b.id, "frontdesk", None).await;
    assert!(matches!(err, Err(EngineError::RoomOccupied(_))));

    // After A checks out, B can come in.
    engine.check_out(a.id, "frontdesk", None).await.unwrap();
    engine.check_in(b.id, "frontdesk", None).await.unwrap();
}

#[tokio::test]
async fn stale_write_rejected_on_seq_mismatch() {
    let engine = new_engine("stale_write.wal");
    let (_, room, guest) = seed(&engine).await;

    let mut r = req(room, guest, T0, T0 + D);
    r.status = BookingStatus::Pending;
    let id = r.id;
    engine.reserve(r).await.unwrap();

    // CAS against the current version succeeds and bumps it.
    engine.confirm(id, "frontdesk", Some(0)).await.unwrap();

    // A second writer still holding seq 0 loses.
    let err = engine.cancel(id, "frontdesk", Some(0)).await;
    assert!(matches!(
        err,
        Err(EngineError::StaleWrite { expected: 0, actual: 1 })
    ));

    engine.cancel(id, "frontdesk", Some(1)).await.unwrap();
}

#[tokio::test]
async fn duplicate_transition_event_is_noop_on_replay() {
    let engine = new_engine("dup_event.wal");
    let (_, room, guest) = seed(&engine).await;

    let mut r = req(room, guest, T0, T0 + D);
    r.status = BookingStatus::Pending;
    engine.reserve(r.clone()).await.unwrap();

    let rs = engine.get_room(&room).unwrap();
    let mut state = rs.read().await.clone();
    let idx = sync::Indexes::new();
    let event = Event::BookingConfirmed {
        id: r.id,
        seq: 1,
        actor: "frontdesk".into(),
        at: now_ms(),
    };
    sync::apply_to_room(&mut state, &event, &idx);
    sync::apply_to_room(&mut state, &event, &idx); // replayed duplicate

    let b = state.booking(r.id).unwrap();
    assert_eq!(b.status, BookingStatus::Confirmed);
    assert_eq!(b.seq, 1);
}

// ── Availability queries ──────────────────────────────────

#[tokio::test]
async fn find_available_rooms_filters_booked() {
    let engine = new_engine("find_available.wal");
    let (room_type, room_a, guest) = seed(&engine).await;
    let room_b = Ulid::new();
    engine.create_room(room_b, "102".into(), room_type).await.unwrap();

    let r = req(room_a, guest, T0, T0 + 2 * D);
    engine.reserve(r.clone()).await.unwrap();

    let available = engine
        .find_available_rooms(room_type, T0, T0 + 2 * D, None)
        .await
        .unwrap();
    assert_eq!(available.len(), 1);
    assert_eq!(available[0].id, room_b);

    // Excluding the stay's own booking treats its span as free again.
    let available = engine
        .find_available_rooms(room_type, T0, T0 + 2 * D, Some(r.id))
        .await
        .unwrap();
    assert_eq!(available.len(), 2);

    // Outside the booked window both rooms are free.
    let available = engine
        .find_available_rooms(room_type, T0 + 2 * D, T0 + 4 * D, None)
        .await
        .unwrap();
    assert_eq!(available.len(), 2);
}

#[tokio::test]
async fn find_available_rooms_unknown_type_is_empty() {
    let engine = new_engine("find_unknown_type.wal");
    seed(&engine).await;
    let available = engine
        .find_available_rooms(Ulid::new(), T0, T0 + D, None)
        .await
        .unwrap();
    assert!(available.is_empty());
}

#[tokio::test]
async fn query_window_too_wide_rejected() {
    let engine = new_engine("wide_window.wal");
    let (room_type, room, _) = seed(&engine).await;

    let err = engine
        .find_available_rooms(room_type, T0, T0 + 800 * D, None)
        .await;
    assert!(matches!(err, Err(EngineError::LimitExceeded(_))));

    let err = engine.room_calendar(room, T0 + D, T0).await;
    assert!(matches!(err, Err(EngineError::InvalidDateRange { .. })));
}

#[tokio::test]
async fn room_calendar_shows_free_gaps() {
    let engine = new_engine("calendar.wal");
    let (_, room, guest) = seed(&engine).await;

    engine.reserve(req(room, guest, T0 + 3 * D, T0 + 5 * D)).await.unwrap();
    let free = engine.room_calendar(room, T0, T0 + 10 * D).await.unwrap();
    assert_eq!(
        free,
        vec![Span::new(T0, T0 + 3 * D), Span::new(T0 + 5 * D, T0 + 10 * D)]
    );
}

// ── Maintenance ───────────────────────────────────────────

#[tokio::test]
async fn maintenance_blocks_reservations_and_availability() {
    let engine = new_engine("maintenance.wal");
    let (room_type, room, guest) = seed(&engine).await;

    engine.set_room_maintenance(room, true, "frontdesk").await.unwrap();
    assert_eq!(room_status(&engine, room).await, RoomStatus::Maintenance);

    let err = engine.reserve(req(room, guest, T0, T0 + D)).await;
    assert!(matches!(err, Err(EngineError::UnderMaintenance(_))));
    let available = engine
        .find_available_rooms(room_type, T0, T0 + D, None)
        .await
        .unwrap();
    assert!(available.is_empty());

    // Setting the same flag twice is a no-op, clearing restores the room.
    engine.set_room_maintenance(room, true, "frontdesk").await.unwrap();
    engine.set_room_maintenance(room, false, "frontdesk").await.unwrap();
    assert_eq!(room_status(&engine, room).await, RoomStatus::Available);
    engine.reserve(req(room, guest, T0, T0 + D)).await.unwrap();
}

#[tokio::test]
async fn maintenance_wins_over_occupied_until_cleared() {
    let engine = new_engine("maintenance_occupied.wal");
    let (_, room, guest) = seed(&engine).await;

    let now = now_ms();
    let r = req(room, guest, now - H, now + 2 * H);
    engine.reserve(r.clone()).await.unwrap();
    engine.check_in(r.id, "frontdesk", None).await.unwrap();

    engine.set_room_maintenance(room, true, "frontdesk").await.unwrap();
    assert_eq!(room_status(&engine, room).await, RoomStatus::Maintenance);
    engine.set_room_maintenance(room, false, "frontdesk").await.unwrap();
    assert_eq!(room_status(&engine, room).await, RoomStatus::Occupied);
}

// ── Group reservations ────────────────────────────────────

#[tokio::test]
async fn group_reserve_commits_across_rooms() {
    let engine = new_engine("group_ok.wal");
    let (room_type, room_a, guest) = seed(&engine).await;
    let room_b = Ulid::new();
    engine.create_room(room_b, "102".into(), room_type).await.unwrap();

    let bookings = engine
        .reserve_many(vec![
            req(room_a, guest, T0, T0 + 2 * D),
            req(room_b, guest, T0, T0 + 2 * D),
        ])
        .await
        .unwrap();
    assert_eq!(bookings.len(), 2);
    assert_eq!(engine.list_bookings(&BookingFilter::default()).await.len(), 2);
}

#[tokio::test]
async fn group_reserve_is_all_or_nothing() {
    let engine = new_engine("group_atomic.wal");
    let (room_type, room_a, guest) = seed(&engine).await;
    let room_b = Ulid::new();
    engine.create_room(room_b, "102".into(), room_type).await.unwrap();

    // room_b already has a conflicting stay
    engine.reserve(req(room_b, guest, T0 + D, T0 + 3 * D)).await.unwrap();

    let err = engine
        .reserve_many(vec![
            req(room_a, guest, T0, T0 + 2 * D),
            req(room_b, guest, T0, T0 + 2 * D),
        ])
        .await;
    assert!(matches!(err, Err(EngineError::Conflict(_))));

    // Nothing from the batch landed — room_a is untouched.
    let filter = BookingFilter { room_id: Some(room_a), ..Default::default() };
    assert!(engine.list_bookings(&filter).await.is_empty());
}

#[tokio::test]
async fn group_reserve_rejects_intra_batch_overlap() {
    let engine = new_engine("group_intra.wal");
    let (_, room, guest) = seed(&engine).await;

    let err = engine
        .reserve_many(vec![
            req(room, guest, T0, T0 + 2 * D),
            req(room, guest, T0 + D, T0 + 3 * D),
        ])
        .await;
    assert!(matches!(err, Err(EngineError::Conflict(_))));
    assert!(engine.list_bookings(&BookingFilter::default()).await.is_empty());
}

#[tokio::test]
async fn group_reserve_rejects_duplicate_booking_id() {
    let engine = new_engine("group_dup_id.wal");
    let (room_type, room_a, guest) = seed(&engine).await;
    let room_b = Ulid::new();
    engine.create_room(room_b, "102".into(), room_type).await.unwrap();

    // Two rows sharing one id, even on different rooms, must not commit:
    // the booking index can only point at one of them.
    let mut dup = req(room_b, guest, T0, T0 + 2 * D);
    let first = req(room_a, guest, T0, T0 + 2 * D);
    dup.id = first.id;

    let err = engine.reserve_many(vec![first, dup]).await;
    assert!(matches!(err, Err(EngineError::AlreadyExists(_))));
    assert!(engine.list_bookings(&BookingFilter::default()).await.is_empty());
}

// ── Inventory and guest records ───────────────────────────

#[tokio::test]
async fn duplicate_room_number_rejected() {
    let engine = new_engine("dup_number.wal");
    let (room_type, _, _) = seed(&engine).await;

    let err = engine.create_room(Ulid::new(), "101".into(), room_type).await;
    assert!(matches!(err, Err(EngineError::AlreadyExists(_))));
}

#[tokio::test]
async fn delete_room_refused_while_bookings_active() {
    let engine = new_engine("delete_room.wal");
    let (_, room, guest) = seed(&engine).await;

    let r = req(room, guest, T0, T0 + D);
    engine.reserve(r.clone()).await.unwrap();

    let err = engine.delete_room(room).await;
    assert!(matches!(err, Err(EngineError::HasActiveBookings(_))));

    engine.cancel(r.id, "frontdesk", None).await.unwrap();
    engine.delete_room(room).await.unwrap();
    assert!(engine.get_booking(r.id).await.is_none());
}

#[tokio::test]
async fn delete_room_type_refused_while_rooms_exist() {
    let engine = new_engine("delete_type.wal");
    let (room_type, room, _) = seed(&engine).await;

    let err = engine.delete_room_type(room_type).await;
    assert!(matches!(err, Err(EngineError::InUse(_))));

    engine.delete_room(room).await.unwrap();
    engine.delete_room_type(room_type).await.unwrap();
}

#[tokio::test]
async fn update_guest_resyncs_booking_copies() {
    let engine = new_engine("guest_resync.wal");
    let (_, room, guest) = seed(&engine).await;

    let r = req(room, guest, T0, T0 + D);
    engine.reserve(r.clone()).await.unwrap();

    engine
        .update_guest(Guest {
            id: guest,
            name: "Ada King".into(),
            email: Some("countess@example.com".into()),
            phone: Some("+44 20 7946 0000".into()),
        })
        .await
        .unwrap();

    let b = engine.get_booking(r.id).await.unwrap();
    assert_eq!(b.guest_name, "Ada King");
    assert_eq!(b.guest_email.as_deref(), Some("countess@example.com"));
}

#[tokio::test]
async fn delete_guest_refused_while_bookings_active() {
    let engine = new_engine("delete_guest.wal");
    let (_, room, guest) = seed(&engine).await;

    let r = req(room, guest, T0, T0 + D);
    engine.reserve(r.clone()).await.unwrap();

    let err = engine.delete_guest(guest).await;
    assert!(matches!(err, Err(EngineError::HasActiveBookings(_))));

    engine.cancel(r.id, "frontdesk", None).await.unwrap();
    engine.delete_guest(guest).await.unwrap();
}

// ── Archival sweep ────────────────────────────────────────

#[tokio::test]
async fn archive_sweeps_old_terminal_bookings_idempotently() {
    let engine = new_engine("archive.wal");
    let (_, room, guest) = seed(&engine).await;

    let cancelled = req(room, guest, T0, T0 + D);
    engine.reserve(cancelled.clone()).await.unwrap();
    engine.cancel(cancelled.id, "frontdesk", None).await.unwrap();

    // Still active — must never be archived.
    let active = req(room, guest, T0 + 2 * D, T0 + 3 * D);
    engine.reserve(active.clone()).await.unwrap();

    let retention = 1000;
    let sweep_at = now_ms() + 2 * retention;
    assert_eq!(engine.archive_eligible(sweep_at, retention).await.unwrap(), 1);

    let b = engine.get_booking(cancelled.id).await.unwrap();
    assert!(b.archived);
    assert_eq!(b.archived_reason.as_deref(), Some("retention"));

    // Hidden from default listings, visible on request.
    let visible = engine.list_bookings(&BookingFilter::default()).await;
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].id, active.id);
    let all = engine
        .list_bookings(&BookingFilter { include_archived: true, ..Default::default() })
        .await;
    assert_eq!(all.len(), 2);

    // Re-running the sweep over the same data is a no-op.
    assert_eq!(engine.archive_eligible(sweep_at, retention).await.unwrap(), 0);
}

#[tokio::test]
async fn archive_skips_recent_terminal_bookings() {
    let engine = new_engine("archive_recent.wal");
    let (_, room, guest) = seed(&engine).await;

    let r = req(room, guest, T0, T0 + D);
    engine.reserve(r.clone()).await.unwrap();
    engine.cancel(r.id, "frontdesk", None).await.unwrap();

    // Retention window has not elapsed yet.
    let n = engine.archive_eligible(now_ms(), 30 * D).await.unwrap();
    assert_eq!(n, 0);
    assert!(!engine.get_booking(r.id).await.unwrap().archived);
}

// ── Durability ────────────────────────────────────────────

#[tokio::test]
async fn state_survives_wal_replay() {
    let path = test_wal_path("replay_full.wal");
    let r;
    let (room_type, room, guest);
    {
        let engine = Engine::new(path.clone(), Arc::new(NotifyHub::new())).unwrap();
        (room_type, room, guest) = seed(&engine).await;
        let mut pending = req(room, guest, T0, T0 + 2 * D);
        pending.status = BookingStatus::Pending;
        r = pending.clone();
        engine.reserve(pending).await.unwrap();
        engine.confirm(r.id, "frontdesk", None).await.unwrap();
        engine.set_room_maintenance(room, true, "frontdesk").await.unwrap();
    }

    let engine = Engine::new(path, Arc::new(NotifyHub::new())).unwrap();
    assert!(engine.room_types.contains_key(&room_type));
    assert!(engine.guests.contains_key(&guest));

    let b = engine.get_booking(r.id).await.unwrap();
    assert_eq!(b.status, BookingStatus::Confirmed);
    assert_eq!(b.seq, 1);
    assert_eq!(b.payment_status, PaymentStatus::Paid);
    assert_eq!(room_status(&engine, room).await, RoomStatus::Maintenance);

    // Replayed state accepts further writes.
    let err = engine.reserve(req(room, guest, T0, T0 + D)).await;
    assert!(matches!(err, Err(EngineError::UnderMaintenance(_))));
}

#[tokio::test]
async fn compaction_preserves_state_and_resets_counter() {
    let path = test_wal_path("compact_state.wal");
    let engine = Engine::new(path.clone(), Arc::new(NotifyHub::new())).unwrap();
    let (_, room, guest) = seed(&engine).await;

    let r = req(room, guest, T0, T0 + 2 * D);
    engine.reserve(r.clone()).await.unwrap();
    let churn = req(room, guest, T0 + 5 * D, T0 + 6 * D);
    engine.reserve(churn.clone()).await.unwrap();
    engine.cancel(churn.id, "frontdesk", None).await.unwrap();

    assert!(engine.wal_appends_since_compact().await > 0);
    engine.compact_wal().await.unwrap();
    assert_eq!(engine.wal_appends_since_compact().await, 0);

    drop(engine);
    let engine = Engine::new(path, Arc::new(NotifyHub::new())).unwrap();
    let b = engine.get_booking(r.id).await.unwrap();
    assert_eq!(b.status, BookingStatus::Confirmed);
    let cancelled = engine.get_booking(churn.id).await.unwrap();
    assert_eq!(cancelled.status, BookingStatus::Cancelled);
    assert_eq!(cancelled.seq, 1);
}

// ── Notifications ─────────────────────────────────────────

#[tokio::test]
async fn lifecycle_transitions_publish_notices() {
    let engine = new_engine("notices.wal");
    let (_, room, guest) = seed(&engine).await;
    let mut rx = engine.notify.subscribe(room);
    let mut all_rx = engine.notify.subscribe_all();

    let mut r = req(room, guest, T0, T0 + D);
    r.status = BookingStatus::Pending;
    engine.reserve(r.clone()).await.unwrap();
    engine.confirm(r.id, "frontdesk", None).await.unwrap();

    assert_eq!(rx.recv().await.unwrap().kind, "BookingCreated");
    let notice = rx.recv().await.unwrap();
    assert_eq!(notice.kind, "Confirmed");
    let value: serde_json::Value = serde_json::from_str(&notice.payload).unwrap();
    assert_eq!(value["booking"]["status"], "Confirmed");

    assert_eq!(all_rx.recv().await.unwrap().kind, "BookingCreated");
    assert_eq!(all_rx.recv().await.unwrap().kind, "Confirmed");
}
