//! Metrics collection and exposition.
//!
//! # Metrics
//! - `guard_requests_total` (counter): requests by method, path, status
//! - `guard_request_duration_seconds` (histogram): latency distribution
//! - `guard_rate_limited_total` (counter): denials by action
//! - `guard_rate_limit_entries` (gauge): tracked rate limit keys
//! - `guard_authz_decisions_total` (counter): allow/deny
//! - `guard_sanitize_total` (counter): sanitize calls by kind
//! - `guard_password_checks_total` (counter): valid/invalid

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, path: &str, status: u16, start: Instant) {
    counter!(
        "guard_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!(
        "guard_request_duration_seconds",
        "method" => method.to_string(),
        "path" => path.to_string()
    )
    .record(start.elapsed().as_secs_f64());
}

pub fn record_rate_limited(action: &'static str) {
    counter!("guard_rate_limited_total", "action" => action).increment(1);
}

pub fn record_tracked_entries(count: usize) {
    gauge!("guard_rate_limit_entries").set(count as f64);
}

pub fn record_authz_decision(allowed: bool) {
    let result = if allowed { "allow" } else { "deny" };
    counter!("guard_authz_decisions_total", "result" => result).increment(1);
}

pub fn record_sanitized(kind: &'static str) {
    counter!("guard_sanitize_total", "kind" => kind).increment(1);
}

pub fn record_password_check(valid: bool) {
    let result = if valid { "valid" } else { "invalid" };
    counter!("guard_password_checks_total", "result" => result).increment(1);
}
