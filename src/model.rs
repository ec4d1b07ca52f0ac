use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only time type.
pub type Ms = i64;

pub const DAY_MS: Ms = 86_400_000;

/// Half-open stay interval `[start, end)` — checkout day is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Nights covered by the stay, rounded up, at least one.
    pub fn nights(&self) -> u32 {
        let n = (self.duration_ms() + DAY_MS - 1) / DAY_MS;
        n.max(1) as u32
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

// ── Status enumerations ──────────────────────────────────────────
//
// Closed enums internally; external strings only enter through the
// `parse` constructors at the SQL boundary.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    InHouse,
    CheckedOut,
    Cancelled,
}

impl BookingStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Pending" => Some(Self::Pending),
            "Confirmed" => Some(Self::Confirmed),
            "InHouse" => Some(Self::InHouse),
            "CheckedOut" => Some(Self::CheckedOut),
            "Cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Confirmed => "Confirmed",
            Self::InHouse => "InHouse",
            Self::CheckedOut => "CheckedOut",
            Self::Cancelled => "Cancelled",
        }
    }

    /// Terminal statuses never transition again; archival applies only to these.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::CheckedOut | Self::Cancelled)
    }

    /// Every non-cancelled booking holds its interval on the room.
    /// CheckedOut stays in the calendar as history; its span is in the
    /// past so it never blocks a future reservation.
    pub fn blocks_availability(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomStatus {
    Available,
    Occupied,
    Maintenance,
}

impl RoomStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "Available",
            Self::Occupied => "Occupied",
            Self::Maintenance => "Maintenance",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Unpaid,
    Paid,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unpaid => "Unpaid",
            Self::Paid => "Paid",
        }
    }
}

// ── Inventory records ────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomType {
    pub id: Ulid,
    pub name: String,
    /// Nightly rate in minor currency units.
    pub base_rate: i64,
    pub max_adults: u32,
    pub max_children: u32,
    pub bed_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guest {
    pub id: Ulid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// A reservation of one room for a guest over a date interval.
///
/// The guest/room/room-type copies are denormalized at write time for fast
/// listing; `sync` re-derives them whenever the underlying guest changes
/// (room numbers and type names are immutable after creation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub reference: String,
    pub guest_id: Ulid,
    pub room_id: Ulid,
    pub room_type_id: Ulid,
    pub span: Span,
    pub adults: u32,
    pub children: u32,
    pub total_amount: i64,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub source: Option<String>,
    pub notes: Option<String>,
    /// Monotonic version, bumped by every lifecycle transition. Transition
    /// events carry the post-transition seq so replaying one twice is a no-op.
    pub seq: u64,
    pub created_at: Ms,
    pub updated_at: Ms,
    pub archived: bool,
    pub archived_at: Option<Ms>,
    pub archived_reason: Option<String>,
    // Denormalized read-path fields.
    pub guest_name: String,
    pub guest_email: Option<String>,
    pub guest_phone: Option<String>,
    pub room_number: String,
    pub room_type_name: String,
    pub nights: u32,
}

/// Per-room state: identity plus the booking calendar, sorted by stay start.
/// `status` is a cached derivation — Occupied iff exactly one InHouse booking,
/// Maintenance set out-of-band wins — and only `sync` writes it.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub id: Ulid,
    pub number: String,
    pub room_type_id: Ulid,
    pub status: RoomStatus,
    pub maintenance: bool,
    pub bookings: Vec<Booking>,
}

impl RoomState {
    pub fn new(id: Ulid, number: String, room_type_id: Ulid) -> Self {
        Self {
            id,
            number,
            room_type_id,
            status: RoomStatus::Available,
            maintenance: false,
            bookings: Vec::new(),
        }
    }

    /// Insert a booking maintaining sort order by span.start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.span.start, |b| b.span.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    /// Return only bookings whose span overlaps the query window.
    /// Binary search skips bookings starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        let right_bound = self.bookings.partition_point(|b| b.span.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }
}

// ── WAL record format ────────────────────────────────────────────

/// The event types — flat, no nesting. This is the WAL record format.
/// Transition events carry the post-transition `seq`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomTypeCreated {
        room_type: RoomType,
    },
    RoomTypeDeleted {
        id: Ulid,
    },
    RoomCreated {
        id: Ulid,
        number: String,
        room_type_id: Ulid,
    },
    RoomDeleted {
        id: Ulid,
    },
    RoomMaintenance {
        id: Ulid,
        on: bool,
        actor: String,
        at: Ms,
    },
    GuestCreated {
        guest: Guest,
    },
    GuestUpdated {
        guest: Guest,
    },
    GuestDeleted {
        id: Ulid,
    },
    BookingReserved {
        booking: Booking,
    },
    BookingConfirmed {
        id: Ulid,
        seq: u64,
        actor: String,
        at: Ms,
    },
    BookingCheckedIn {
        id: Ulid,
        seq: u64,
        actor: String,
        at: Ms,
    },
    BookingCheckedOut {
        id: Ulid,
        seq: u64,
        actor: String,
        at: Ms,
    },
    BookingCancelled {
        id: Ulid,
        seq: u64,
        actor: String,
        at: Ms,
    },
    BookingArchived {
        id: Ulid,
        at: Ms,
        reason: String,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub id: Ulid,
    pub number: String,
    pub room_type_id: Ulid,
    pub status: RoomStatus,
}

/// Which bookings a listing should return. Archived rows are excluded
/// unless explicitly requested.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookingFilter {
    pub id: Option<Ulid>,
    pub room_id: Option<Ulid>,
    pub guest_id: Option<Ulid>,
    pub include_archived: bool,
}
