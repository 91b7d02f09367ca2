//! Metrics collection and exposition.
//!
//! # Metrics
//! - `bob_node_available` (gauge): 1=available, 0=unavailable, per node
//! - `bob_node_cursor` (gauge): last observed tick, per node
//! - `bob_probe_latency_seconds` (histogram): status probe latency
//! - `bob_requests_total` (counter): requests by method, outcome
//! - `bob_request_duration_seconds` (histogram): request latency
//! - `bob_reconnect_attempts_total` (counter)
//! - `bob_notifications_total` (counter): delivered pushes by kind
//! - `bob_frames_dropped_total` (counter): discarded frames by reason
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - The Prometheus exporter is opt-in (CLI `watch` mode)

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_node_health(node: &str, available: bool) {
    ::metrics::gauge!("bob_node_available", "node" => node.to_string())
        .set(if available { 1.0 } else { 0.0 });
}

pub fn record_node_cursor(node: &str, cursor: u64) {
    ::metrics::gauge!("bob_node_cursor", "node" => node.to_string()).set(cursor as f64);
}

pub fn record_probe_latency(node: &str, latency: Duration) {
    ::metrics::histogram!("bob_probe_latency_seconds", "node" => node.to_string())
        .record(latency.as_secs_f64());
}

pub fn record_request(method: &str, outcome: &'static str, duration: Duration) {
    ::metrics::counter!(
        "bob_requests_total",
        "method" => method.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    ::metrics::histogram!("bob_request_duration_seconds", "method" => method.to_string())
        .record(duration.as_secs_f64());
}

pub fn record_reconnect_attempt() {
    ::metrics::counter!("bob_reconnect_attempts_total").increment(1);
}

pub fn record_notification(kind: &'static str) {
    ::metrics::counter!("bob_notifications_total", "kind" => kind).increment(1);
}

pub fn record_dropped_frame(reason: &'static str) {
    ::metrics::counter!("bob_frames_dropped_total", "reason" => reason).increment(1);
}
