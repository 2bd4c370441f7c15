use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total statements executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "netdoc_queries_total";

/// Histogram: statement latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "netdoc_query_duration_seconds";

/// Counter: mutations rejected by an occupancy check. Labels: kind.
pub const OCCUPANCY_CONFLICTS_TOTAL: &str = "netdoc_occupancy_conflicts_total";

/// Counter: CSV rows processed by import. Labels: table, outcome.
pub const IMPORT_ROWS_TOTAL: &str = "netdoc_import_rows_total";

// ── USE metrics (resource utilization) ──────────────────────────

pub const CONNECTIONS_ACTIVE: &str = "netdoc_connections_active";
pub const CONNECTIONS_TOTAL: &str = "netdoc_connections_total";
pub const CONNECTIONS_REJECTED_TOTAL: &str = "netdoc_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "netdoc_wal_flush_duration_seconds";

/// Histogram: events per WAL flush.
pub const WAL_FLUSH_BATCH_SIZE: &str = "netdoc_wal_flush_batch_size";

/// Counter: completed WAL compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "netdoc_wal_compactions_total";

/// Install the Prometheus exporter on `port`. No-op if `port` is `None`.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short metrics label for a command.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::Insert(_) => "insert",
        Command::Update(_) => "update",
        Command::Delete { .. } => "delete",
        Command::Select { .. } => "select",
        Command::Import { .. } => "copy_from",
        Command::Export { .. } => "copy_to",
    }
}
