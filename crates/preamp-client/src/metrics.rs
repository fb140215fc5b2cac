//! Metrics collection and export for preampctl.
//!
//! Uses the `metrics` crate for instrumentation and can export to
//! Prometheus format. Without an installed recorder every call is a no-op.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const SESSIONS_ACTIVE: &str = "preamp_sessions_active";
    pub const FRAMES_SENT: &str = "preamp_frames_sent_total";
    pub const FRAMES_RECEIVED: &str = "preamp_frames_received_total";
    pub const BYTES_SENT: &str = "preamp_bytes_sent_total";
    pub const BYTES_RECEIVED: &str = "preamp_bytes_received_total";
    pub const EXCHANGE_SECONDS: &str = "preamp_exchange_seconds";
    pub const TIMEOUTS_TOTAL: &str = "preamp_timeouts_total";
    pub const ERRORS_TOTAL: &str = "preamp_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_gauge!(names::SESSIONS_ACTIVE, "Current number of unit sessions");
    metrics::describe_counter!(names::FRAMES_SENT, "Frames written to the unit, by kind");
    metrics::describe_counter!(
        names::FRAMES_RECEIVED,
        "Frames received from the unit, by decoded kind"
    );
    metrics::describe_counter!(names::BYTES_SENT, "Bytes written to the unit");
    metrics::describe_counter!(names::BYTES_RECEIVED, "Bytes received from the unit");
    metrics::describe_histogram!(
        names::EXCHANGE_SECONDS,
        "Time from writing a frame to the unit's response"
    );
    metrics::describe_counter!(
        names::TIMEOUTS_TOTAL,
        "Exchanges abandoned without a response"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of transport errors");

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

/// Record a frame written to the unit.
pub fn record_frame_sent(kind: &'static str, bytes: usize) {
    counter!(names::FRAMES_SENT, "kind" => kind).increment(1);
    counter!(names::BYTES_SENT).increment(bytes as u64);
}

/// Record a frame received from the unit.
pub fn record_frame_received(kind: &'static str, bytes: usize) {
    counter!(names::FRAMES_RECEIVED, "kind" => kind).increment(1);
    counter!(names::BYTES_RECEIVED).increment(bytes as u64);
}

/// Record how long an exchange took.
pub fn record_exchange_latency(seconds: f64) {
    histogram!(names::EXCHANGE_SECONDS).record(seconds);
}

/// Record an abandoned exchange.
pub fn record_timeout(kind: &'static str) {
    counter!(names::TIMEOUTS_TOTAL, "kind" => kind).increment(1);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Tracks a live session; decrements the gauge on drop.
pub struct SessionMetricsGuard;

impl SessionMetricsGuard {
    #[must_use]
    pub fn new() -> Self {
        gauge!(names::SESSIONS_ACTIVE).increment(1.0);
        Self
    }
}

impl Default for SessionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SessionMetricsGuard {
    fn drop(&mut self) {
        gauge!(names::SESSIONS_ACTIVE).decrement(1.0);
    }
}
