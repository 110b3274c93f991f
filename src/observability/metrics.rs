//! Metrics collection and exposition.
//!
//! # Metrics
//! - `adapter_rpc_total` (counter): protocol RPCs by method and status
//! - `adapter_rpc_duration_seconds` (histogram): RPC latency
//! - `adapter_push_total` (counter): downstream pushes by kind and outcome
//! - `adapter_cache_hit_total` (counter): push-cache hits by kind
//! - `adapter_subscriptions_active` (gauge): open streaming subscriptions

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "failed to install metrics exporter"),
    }
}

/// Record one protocol RPC.
pub fn record_rpc(method: &'static str, status: u16, start: Instant) {
    metrics::counter!(
        "adapter_rpc_total",
        "method" => method,
        "status" => status.to_string(),
    )
    .increment(1);
    metrics::histogram!("adapter_rpc_duration_seconds", "method" => method)
        .record(start.elapsed().as_secs_f64());
}

/// Record one downstream push outcome.
pub fn record_push(kind: &str, success: bool) {
    metrics::counter!(
        "adapter_push_total",
        "kind" => kind.to_string(),
        "outcome" => if success { "ok" } else { "error" },
    )
    .increment(1);
}

/// Record a push-cache hit.
pub fn record_cache_hit(kind: &str) {
    metrics::counter!("adapter_cache_hit_total", "kind" => kind.to_string()).increment(1);
}

/// Track the number of open streaming subscriptions.
pub fn record_subscriptions(count: usize) {
    metrics::gauge!("adapter_subscriptions_active").set(count as f64);
}
