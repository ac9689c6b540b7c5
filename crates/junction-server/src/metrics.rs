//! Metrics collection and export for Junction.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "junction_connections_total";
    pub const HANDSHAKES_ACTIVE: &str = "junction_handshakes_active";
    pub const SESSIONS_WELCOMED: &str = "junction_sessions_welcomed_total";
    pub const HANDSHAKES_ABORTED: &str = "junction_handshakes_aborted_total";
    pub const REALMS_ACTIVE: &str = "junction_realms_active";
    pub const ERRORS_TOTAL: &str = "junction_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    // Describe metrics
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::HANDSHAKES_ACTIVE,
        "Connections currently between accept and WELCOME or ABORT"
    );
    metrics::describe_counter!(names::SESSIONS_WELCOMED, "Total number of sessions welcomed");
    metrics::describe_counter!(
        names::HANDSHAKES_ABORTED,
        "Total number of handshakes aborted, by reason"
    );
    metrics::describe_gauge!(names::REALMS_ACTIVE, "Current number of registered realms");
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a welcomed session.
pub fn record_welcome() {
    counter!(names::SESSIONS_WELCOMED).increment(1);
}

/// Record an aborted handshake.
pub fn record_abort(reason: &str) {
    counter!(names::HANDSHAKES_ABORTED, "reason" => reason.to_string()).increment(1);
}

/// Update registered realm count.
pub fn set_active_realms(count: usize) {
    gauge!(names::REALMS_ACTIVE).set(count as f64);
}

/// Record an error.
pub fn record_error(error_type: &str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type.to_string()).increment(1);
}

/// Metrics guard that tracks a handshake in flight.
pub struct HandshakeMetricsGuard;

impl HandshakeMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        counter!(names::CONNECTIONS_TOTAL).increment(1);
        gauge!(names::HANDSHAKES_ACTIVE).increment(1.0);
        Self
    }
}

impl Default for HandshakeMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for HandshakeMetricsGuard {
    fn drop(&mut self) {
        gauge!(names::HANDSHAKES_ACTIVE).decrement(1.0);
    }
}
