use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total HTTP requests handled. Labels: method, path, status.
pub const HTTP_REQUESTS_TOTAL: &str = "pitchbook_http_requests_total";

/// Histogram: request latency in seconds. Labels: method, path.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "pitchbook_http_request_duration_seconds";

/// Counter: bookings committed.
pub const BOOKINGS_CREATED_TOTAL: &str = "pitchbook_bookings_created_total";

/// Counter: create/update attempts rejected by the conflict check.
pub const BOOKING_CONFLICTS_TOTAL: &str = "pitchbook_booking_conflicts_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: number of active academies (loaded engines).
pub const TENANTS_ACTIVE: &str = "pitchbook_tenants_active";

/// Counter: requests rejected for missing/invalid bearer tokens.
pub const AUTH_FAILURES_TOTAL: &str = "pitchbook_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "pitchbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "pitchbook_wal_flush_batch_size";

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
