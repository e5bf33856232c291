//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define connector metrics (connections, rejections, requests, latency)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `connector_connections_total` (counter): accepted connections by protocol
//! - `connector_connections_rejected_total` (counter): connections dropped by a full pool
//! - `connector_requests_total` (counter): completed requests by protocol, status
//! - `connector_request_duration_seconds` (histogram): decode-to-flush latency
//! - `connector_busy_workers` (gauge): workers currently serving a connection
//!
//! # Design Decisions
//! - Low-overhead metric updates (atomic operations)
//! - Without an installed recorder every call is a no-op

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::protocol::Protocol;

/// Install the Prometheus recorder and its HTTP scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_connection(protocol: Protocol) {
    metrics::counter!("connector_connections_total", "protocol" => protocol.to_string()).increment(1);
}

pub fn record_rejection(protocol: Protocol) {
    metrics::counter!("connector_connections_rejected_total", "protocol" => protocol.to_string()).increment(1);
}

pub fn record_request(protocol: Protocol, status: u16, start: Instant) {
    metrics::counter!(
        "connector_requests_total",
        "protocol" => protocol.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("connector_request_duration_seconds", "protocol" => protocol.to_string())
        .record(start.elapsed().as_secs_f64());
}
