//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by route and status
//! - `gateway_request_duration_seconds` (histogram): end-to-end latency
//! - `gateway_cache_lookups_total` (counter): cache lookups by result
//! - `gateway_cache_evictions_total` (counter): LRU evictions
//! - `gateway_cache_entries` (gauge): current cache size
//! - `gateway_rate_limited_total` (counter): denials by violated window
//! - `gateway_circuit_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `gateway_circuit_transitions_total` (counter): breaker transitions
//! - `gateway_retries_total` (counter): retry attempts per service
//! - `gateway_operation_duration_seconds` (histogram): tracked operations
//!
//! All helpers are no-ops until a recorder is installed, so library users and
//! tests never need to call [`init_metrics`].

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::resilience::circuit_breaker::CircuitState;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(route: &str, status: u16, start: Instant) {
    counter!(
        "gateway_requests_total",
        "route" => route.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("gateway_request_duration_seconds", "route" => route.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_cache_lookup(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!("gateway_cache_lookups_total", "result" => result).increment(1);
}

pub fn record_cache_eviction() {
    counter!("gateway_cache_evictions_total").increment(1);
}

pub fn record_cache_size(size: usize) {
    gauge!("gateway_cache_entries").set(size as f64);
}

pub fn record_rate_limited(window: &'static str) {
    counter!("gateway_rate_limited_total", "window" => window).increment(1);
}

pub fn record_circuit_transition(service: &str, from: CircuitState, to: CircuitState) {
    counter!(
        "gateway_circuit_transitions_total",
        "service" => service.to_string(),
        "from" => from.as_str(),
        "to" => to.as_str()
    )
    .increment(1);
    record_circuit_state(service, to);
}

pub fn record_circuit_state(service: &str, state: CircuitState) {
    let value = match state {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    };
    gauge!("gateway_circuit_state", "service" => service.to_string()).set(value);
}

pub fn record_retry(service: &str) {
    counter!("gateway_retries_total", "service" => service.to_string()).increment(1);
}

pub fn record_operation(operation: &str, duration_ms: f64, success: bool) {
    let outcome = if success { "success" } else { "failure" };
    histogram!(
        "gateway_operation_duration_seconds",
        "operation" => operation.to_string(),
        "outcome" => outcome
    )
    .record(duration_ms / 1000.0);
}
