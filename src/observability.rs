use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "frontdesk_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "frontdesk_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "frontdesk_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "frontdesk_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "frontdesk_connections_rejected_total";

/// Gauge: number of active properties (loaded engines).
pub const PROPERTIES_ACTIVE: &str = "frontdesk_properties_active";

/// Counter: startup/auth failures.
pub const AUTH_FAILURES_TOTAL: &str = "frontdesk_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "frontdesk_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "frontdesk_wal_flush_batch_size";

/// Counter: bookings moved to the archive by the retention sweep.
pub const BOOKINGS_ARCHIVED_TOTAL: &str = "frontdesk_bookings_archived_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertRoomType { .. } => "insert_room_type",
        Command::DeleteRoomType { .. } => "delete_room_type",
        Command::InsertRoom { .. } => "insert_room",
        Command::DeleteRoom { .. } => "delete_room",
        Command::SetRoomMaintenance { .. } => "set_room_maintenance",
        Command::InsertGuest { .. } => "insert_guest",
        Command::UpdateGuest { .. } => "update_guest",
        Command::DeleteGuest { .. } => "delete_guest",
        Command::InsertBooking(_) => "insert_booking",
        Command::BatchInsertBookings(_) => "batch_insert_bookings",
        Command::UpdateBookingStatus { .. } => "update_booking_status",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectCalendar { .. } => "select_calendar",
        Command::SelectBookings(_) => "select_bookings",
        Command::SelectRooms => "select_rooms",
        Command::SelectRoomTypes => "select_room_types",
        Command::SelectGuests => "select_guests",
        Command::Listen { .. } => "listen",
    }
}
