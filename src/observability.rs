use std::net::SocketAddr;

use tracing_subscriber::EnvFilter;

use crate::sql::Command;

// ── Request metrics ─────────────────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "slotbook_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "slotbook_query_duration_seconds";

/// Counter: reservation attempts. Labels: outcome (`ok` or a rejection reason).
pub const RESERVATIONS_TOTAL: &str = "slotbook_reservations_total";

/// Histogram: time spent deciding a reservation, WAL fsync included.
pub const RESERVE_DURATION_SECONDS: &str = "slotbook_reserve_duration_seconds";

/// Counter: pending appointments cancelled by the reaper.
pub const APPOINTMENTS_EXPIRED_TOTAL: &str = "slotbook_appointments_expired_total";

// ── Resource metrics ────────────────────────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "slotbook_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "slotbook_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "slotbook_connections_rejected_total";

/// Gauge: businesses currently loaded.
pub const BUSINESSES_ACTIVE: &str = "slotbook_businesses_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotbook_wal_flush_batch_size";

/// Install the global tracing subscriber. `RUST_LOG` picks the filter,
/// `info` otherwise.
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init_metrics(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
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
        Command::InsertBusiness { .. } => "insert_business",
        Command::DeleteBusiness { .. } => "delete_business",
        Command::InsertSchedules { .. } => "insert_schedules",
        Command::InsertService { .. } => "insert_service",
        Command::DeleteService { .. } => "delete_service",
        Command::InsertAppointment { .. } => "reserve",
        Command::ConfirmAppointment { .. } => "confirm",
        Command::CancelAppointment { .. } => "cancel",
        Command::SelectBusinesses { .. } => "select_businesses",
        Command::SelectSchedules { .. } => "select_schedules",
        Command::SelectServices { .. } => "select_services",
        Command::SelectAppointment { .. } | Command::SelectAppointments { .. } => "select_appointments",
        Command::SelectCalendar { .. } => "select_calendar",
        Command::SelectSlots { .. } => "select_slots",
        Command::SelectOccupancy { .. } => "select_occupancy",
    }
}
