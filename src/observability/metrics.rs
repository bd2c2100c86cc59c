//! Metrics collection and exposition.
//!
//! # Metrics
//! - `container_requests_total` (counter): requests by context, status
//! - `container_request_duration_seconds` (histogram): latency by context
//! - `container_active_connections` (gauge): connections being served
//! - `container_connections_rejected_total` (counter): backlog overflow
//! - `container_deployments_total` (counter): deploy/undeploy/failed events
//! - `container_sessions_active` (gauge): sessions per context
//! - `container_sessions_expired_total` (counter): expired sessions per context
//! - `container_handler_failures_total` (counter): init/service failures

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(context: &str, status: u16, start: Instant) {
    metrics::counter!(
        "container_requests_total",
        "context" => context.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("container_request_duration_seconds", "context" => context.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn set_active_connections(count: usize) {
    metrics::gauge!("container_active_connections").set(count as f64);
}

pub fn record_connection_rejected() {
    metrics::counter!("container_connections_rejected_total").increment(1);
}

/// `event` is one of `deployed`, `undeployed`, `failed`.
pub fn record_deployment(event: &'static str) {
    metrics::counter!("container_deployments_total", "event" => event).increment(1);
}

pub fn record_sessions(context: &str, active: usize) {
    metrics::gauge!("container_sessions_active", "context" => context.to_string()).set(active as f64);
}

pub fn record_sessions_expired(context: &str, count: u64) {
    metrics::counter!("container_sessions_expired_total", "context" => context.to_string())
        .increment(count);
}

/// `phase` is `init` or `service`.
pub fn record_handler_failure(context: &str, handler: &str, phase: &'static str) {
    metrics::counter!(
        "container_handler_failures_total",
        "context" => context.to_string(),
        "handler" => handler.to_string(),
        "phase" => phase
    )
    .increment(1);
}
