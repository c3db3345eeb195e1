use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "seatd_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "seatd_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "seatd_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "seatd_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "seatd_connections_rejected_total";

/// Gauge: number of loaded restaurants (tenant engines).
pub const TENANTS_ACTIVE: &str = "seatd_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "seatd_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (records per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "seatd_wal_flush_batch_size";

// ── Domain counters ─────────────────────────────────────────────

/// Counter: seat allocations committed. Labels: intent.
pub const ALLOCATIONS_TOTAL: &str = "seatd_allocations_total";

/// Counter: allocation requests rejected because a seat was taken.
pub const ALLOCATION_CONFLICTS_TOTAL: &str = "seatd_allocation_conflicts_total";

/// Counter: occupant status transitions. Labels: action.
pub const TRANSITIONS_TOTAL: &str = "seatd_transitions_total";

/// Counter: reservation requests refused for lack of capacity.
pub const ADMISSIONS_REFUSED_TOTAL: &str = "seatd_admissions_refused_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertLocation { .. } => "insert_location",
        Command::UpdateLocation { .. } => "update_location",
        Command::DeleteLocation { .. } => "delete_location",
        Command::SelectLocations => "select_locations",
        Command::UpsertCapacity { .. } => "upsert_capacity",
        Command::SelectCapacity { .. } => "select_capacity",
        Command::InsertSection { .. } => "insert_section",
        Command::DeleteSection { .. } => "delete_section",
        Command::SelectSections { .. } => "select_sections",
        Command::InsertSeat { .. } => "insert_seat",
        Command::DeleteSeat { .. } => "delete_seat",
        Command::SelectSeats { .. } => "select_seats",
        Command::InsertBlockedPeriod { .. } => "insert_blocked_period",
        Command::UpdateBlockedPeriod { .. } => "update_blocked_period",
        Command::DeleteBlockedPeriod { .. } => "delete_blocked_period",
        Command::SelectBlockedPeriods { .. } => "select_blocked_periods",
        Command::UpsertOperatingHours { .. } => "upsert_operating_hours",
        Command::SelectOperatingHours => "select_operating_hours",
        Command::InsertSpecialEvent { .. } => "insert_special_event",
        Command::DeleteSpecialEvent { .. } => "delete_special_event",
        Command::SelectSpecialEvents => "select_special_events",
        Command::UpdateSettings { .. } => "update_settings",
        Command::SelectSettings => "select_settings",
        Command::InsertReservation { .. } => "insert_reservation",
        Command::InsertWaitlistEntry { .. } => "insert_waitlist_entry",
        Command::UpdateOccupantStatus { .. } => "update_occupant_status",
        Command::SelectOccupants { .. } => "select_occupants",
        Command::InsertAllocations { .. } => "insert_allocations",
        Command::DeleteAllocation { .. } => "delete_allocation",
        Command::ReleaseAllocations { .. } => "release_allocations",
        Command::SelectAllocations { .. } => "select_allocations",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectCapacityCheck { .. } => "select_capacity_check",
    }
}
