//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define runner metrics (requests, latency, emitted bytes, failures)
//! - Expose Prometheus-compatible metrics endpoint in `serve` mode
//!
//! # Metrics
//! - `runner_requests_total` (counter): handled requests by method, status
//! - `runner_request_duration_seconds` (histogram): time from start to emit
//! - `runner_emitted_bytes_total` (counter): body bytes written by the emitter
//! - `runner_dispatch_failures_total` (counter): requests answered by the error catcher
//!
//! # Design Decisions
//! - Without an installed recorder every call is a no-op (CGI mode)
//! - Labels are limited to method and status code

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Record one handled request.
pub fn record_request(method: &str, status: u16, start: Instant) {
    metrics::counter!(
        "runner_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("runner_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

/// Record body bytes handed to the output channel.
pub fn record_emitted_bytes(bytes: u64) {
    metrics::counter!("runner_emitted_bytes_total").increment(bytes);
}

/// Record a dispatch failure routed to the error catcher.
pub fn record_dispatch_failure() {
    metrics::counter!("runner_dispatch_failures_total").increment(1);
}

/// Install the Prometheus recorder and its HTTP listener.
///
/// Must run inside a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics recorder"),
    }
}
