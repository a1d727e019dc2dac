use std::net::SocketAddr;

// ── Reservation flow ────────────────────────────────────────────

/// Counter: reservations persisted (any initial status).
pub const RESERVATIONS_CREATED_TOTAL: &str = "roombook_reservations_created_total";

/// Counter: reservations moved to cancelled.
pub const RESERVATIONS_CANCELLED_TOTAL: &str = "roombook_reservations_cancelled_total";

/// Counter: writes refused because a confirmed reservation already holds the room.
pub const AVAILABILITY_CONFLICTS_TOTAL: &str = "roombook_availability_conflicts_total";

/// Counter: conditional writes that lost the race. Labels: kind.
pub const VERSION_CONFLICTS_TOTAL: &str = "roombook_version_conflicts_total";

// ── Storage ─────────────────────────────────────────────────────

/// Counter: store calls that failed for reasons other than the request itself.
pub const STORE_UNAVAILABLE_TOTAL: &str = "roombook_store_unavailable_total";

/// Histogram: WAL append + fsync duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "roombook_wal_flush_duration_seconds";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
