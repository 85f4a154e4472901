//! Metrics collection and export for the relay.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "relay_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "relay_connections_active";
    pub const HANDSHAKE_REJECTIONS_TOTAL: &str = "relay_handshake_rejections_total";
    pub const EVENTS_TOTAL: &str = "relay_events_total";
    pub const MESSAGES_BYTES: &str = "relay_messages_bytes";
    pub const FANOUT_RECIPIENTS: &str = "relay_fanout_recipients";
    pub const CHATS_ACTIVE: &str = "relay_chats_active";
    pub const SIDE_EFFECT_FAILURES_TOTAL: &str = "relay_side_effect_failures_total";
    pub const LATENCY_SECONDS: &str = "relay_latency_seconds";
    pub const ERRORS_TOTAL: &str = "relay_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of WebSocket connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of open WebSocket connections"
    );
    metrics::describe_counter!(
        names::HANDSHAKE_REJECTIONS_TOTAL,
        "Connection attempts refused during the handshake"
    );
    metrics::describe_counter!(names::EVENTS_TOTAL, "Inbound chat events processed");
    metrics::describe_counter!(names::MESSAGES_BYTES, "Total bytes of frames processed");
    metrics::describe_histogram!(
        names::FANOUT_RECIPIENTS,
        "Connections reached per broadcast"
    );
    metrics::describe_gauge!(names::CHATS_ACTIVE, "Chats with at least one live member");
    metrics::describe_counter!(
        names::SIDE_EFFECT_FAILURES_TOTAL,
        "Failed calls to the chat-management service"
    );
    metrics::describe_histogram!(
        names::LATENCY_SECONDS,
        "Inbound event processing latency in seconds"
    );
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

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a refused handshake.
pub fn record_handshake_rejection(kind: &'static str) {
    counter!(names::HANDSHAKE_REJECTIONS_TOTAL, "reason" => kind).increment(1);
}

/// Record a processed event and its fan-out.
pub fn record_event(action: &'static str, recipients: usize) {
    counter!(names::EVENTS_TOTAL, "action" => action).increment(1);
    histogram!(names::FANOUT_RECIPIENTS).record(recipients as f64);
}

/// Record frame bytes.
pub fn record_bytes(bytes: usize, direction: &'static str) {
    counter!(names::MESSAGES_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record event processing latency.
pub fn record_latency(seconds: f64) {
    histogram!(names::LATENCY_SECONDS).record(seconds);
}

/// Update active chat count.
pub fn set_active_chats(count: usize) {
    gauge!(names::CHATS_ACTIVE).set(count as f64);
}

/// Record a failed side-effect call.
pub fn record_side_effect_failure(operation: &'static str) {
    counter!(names::SIDE_EFFECT_FAILURES_TOTAL, "operation" => operation).increment(1);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}
