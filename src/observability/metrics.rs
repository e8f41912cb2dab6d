//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define runtime metrics (requests, rejections, breaker, bulkhead, retries, workers)
//! - Expose a Prometheus-compatible scrape endpoint
//!
//! # Metrics
//! - `runtime_requests_total` (counter): requests by method, status
//! - `runtime_request_duration_seconds` (histogram): latency distribution
//! - `runtime_admission_rejections_total` (counter): rejections by kind
//! - `runtime_breaker_transitions_total` (counter): by breaker, from, to
//! - `runtime_breaker_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `runtime_bulkhead_in_flight` (gauge): requests holding a slot
//! - `runtime_outbound_retries_total` (counter): by reason
//! - `runtime_worker_exits_total` (counter): by worker, outcome
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op, so tests need no setup

use std::net::SocketAddr;
use tokio::time::Instant;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::http::response::FailureKind;

const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Install the Prometheus recorder and its HTTP listener on `addr`.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets(LATENCY_BUCKETS)?
        .install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    let method = method.to_owned();
    ::metrics::counter!(
        "runtime_requests_total",
        "method" => method.clone(),
        "status" => status.to_string()
    )
    .increment(1);
    ::metrics::histogram!("runtime_request_duration_seconds", "method" => method)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_rejection(kind: FailureKind) {
    ::metrics::counter!("runtime_admission_rejections_total", "kind" => kind.as_str())
        .increment(1);
}

pub fn record_breaker_transition(name: &str, from: &'static str, to: &'static str) {
    ::metrics::counter!(
        "runtime_breaker_transitions_total",
        "breaker" => name.to_owned(),
        "from" => from,
        "to" => to
    )
    .increment(1);
    let level = match to {
        "closed" => 0.0,
        "half-open" => 1.0,
        _ => 2.0,
    };
    ::metrics::gauge!("runtime_breaker_state", "breaker" => name.to_owned()).set(level);
}

pub fn set_bulkhead_in_flight(in_flight: u64) {
    ::metrics::gauge!("runtime_bulkhead_in_flight").set(in_flight as f64);
}

pub fn record_outbound_retry(reason: &'static str) {
    ::metrics::counter!("runtime_outbound_retries_total", "reason" => reason).increment(1);
}

pub fn record_worker_exit(worker: &str, outcome: &'static str) {
    ::metrics::counter!(
        "runtime_worker_exits_total",
        "worker" => worker.to_owned(),
        "outcome" => outcome
    )
    .increment(1);
}
