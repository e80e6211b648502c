use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: bookings accepted by the admission gate.
pub const ADMISSIONS_TOTAL: &str = "bookgate_admissions_total";

/// Counter: bookings refused for capacity.
pub const REJECTIONS_TOTAL: &str = "bookgate_rejections_total";

/// Counter: admissions that lost the optimistic race and re-ran locked.
pub const ADMISSION_RETRIES_TOTAL: &str = "bookgate_admission_retries_total";

/// Counter: availability day-table queries served.
pub const AVAILABILITY_QUERIES_TOTAL: &str = "bookgate_availability_queries_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "bookgate_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "bookgate_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "bookgate_wal_flush_batch_size";

/// Install the Prometheus metrics exporter on the given port. No-op if the
/// port is None, so embedders without scraping pay nothing.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}
