//! Metrics collection and exposition.
//!
//! # Metrics
//! - `tunnel_sessions_total` (counter): finished tunnels by variant and outcome
//! - `tunnel_active` (gauge): tunnels currently alive
//! - `tunnel_bytes_total` (counter): bytes relayed, by direction
//! - `tunnel_handshake_duration_seconds` (histogram): dial + handshake latency
//!
//! # Design Decisions
//! - Recorded through the `metrics` facade; without an installed recorder
//!   every call is a no-op, so library users pay nothing
//! - Prometheus exposition is opt-in from the binary

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder with an HTTP scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn set_active_tunnels(count: u64) {
    metrics::gauge!("tunnel_active").set(count as f64);
}

pub fn record_tunnel(variant: &'static str, outcome: &'static str) {
    metrics::counter!("tunnel_sessions_total", "variant" => variant, "outcome" => outcome).increment(1);
}

pub fn record_bytes(direction: &'static str, bytes: u64) {
    metrics::counter!("tunnel_bytes_total", "direction" => direction).increment(bytes);
}

pub fn record_handshake(variant: &'static str, started: Instant) {
    metrics::histogram!("tunnel_handshake_duration_seconds", "variant" => variant)
        .record(started.elapsed().as_secs_f64());
}
