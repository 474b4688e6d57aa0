//! Metrics collection and exposition.
//!
//! # Metrics
//! - `agent_bridge_calls_total` (counter): calls by capability, outcome
//! - `agent_bridge_call_duration_seconds` (histogram): end-to-end call latency
//! - `agent_bridge_retries_total` (counter): backoff retries by capability
//! - `agent_bridge_fallbacks_total` (counter): fallbacks served by capability
//! - `agent_bridge_circuit_state` (gauge): 0=closed, 1=open, 2=half-open
//! - `agent_bridge_token_refreshes_total` (counter): refreshes by result
//! - `agent_bridge_stream_chunks_total` (counter): chunks accumulated
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::resilience::circuit_breaker::CircuitState;

/// Install the Prometheus recorder and its HTTP scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_call(capability: &str, outcome: &'static str, duration: Duration) {
    metrics::counter!(
        "agent_bridge_calls_total",
        "capability" => capability.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    metrics::histogram!(
        "agent_bridge_call_duration_seconds",
        "capability" => capability.to_string()
    )
    .record(duration.as_secs_f64());
}

pub fn record_retry(capability: &str) {
    metrics::counter!("agent_bridge_retries_total", "capability" => capability.to_string()).increment(1);
}

pub fn record_fallback(capability: &str) {
    metrics::counter!("agent_bridge_fallbacks_total", "capability" => capability.to_string()).increment(1);
}

pub fn record_circuit_state(breaker: &str, state: CircuitState) {
    let value = match state {
        CircuitState::Closed => 0.0,
        CircuitState::Open => 1.0,
        CircuitState::HalfOpen => 2.0,
    };
    metrics::gauge!("agent_bridge_circuit_state", "breaker" => breaker.to_string()).set(value);
}

pub fn record_token_refresh(result: &'static str) {
    metrics::counter!("agent_bridge_token_refreshes_total", "result" => result).increment(1);
}

pub fn record_stream_chunk() {
    metrics::counter!("agent_bridge_stream_chunks_total").increment(1);
}
