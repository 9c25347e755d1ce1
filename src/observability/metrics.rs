//! Metrics collection.
//!
//! # Metrics
//! - `gatekeeper_circuit_transitions_total` (counter): breaker state changes by breaker, target state
//! - `gatekeeper_circuit_rejections_total` (counter): fail-fast rejections by breaker
//! - `gatekeeper_retry_attempts_total` (counter): attempts beyond the first
//! - `gatekeeper_retries_exhausted_total` (counter): sequences that ran out of attempts
//! - `gatekeeper_rate_limited_total` (counter): denials by violated cap
//! - `gatekeeper_requests_allowed_total` (counter): requests passing every check
//! - `gatekeeper_requests_rejected_total` (counter): rejections by category
//! - `gatekeeper_pool_connections` (gauge): idle/active connections by pool
//! - `gatekeeper_pool_timeouts_total` (counter): acquire timeouts by pool
//!
//! # Design Decisions
//! - Recorded through the `metrics` facade; the host installs an exporter
//! - Low-overhead metric updates, no-ops when no recorder is installed

use metrics::{counter, gauge};

pub fn record_circuit_transition(breaker: &str, to: &'static str) {
    counter!("gatekeeper_circuit_transitions_total", "breaker" => breaker.to_string(), "to" => to)
        .increment(1);
}

pub fn record_circuit_rejected(breaker: &str) {
    counter!("gatekeeper_circuit_rejections_total", "breaker" => breaker.to_string()).increment(1);
}

pub fn record_retry_attempt() {
    counter!("gatekeeper_retry_attempts_total").increment(1);
}

pub fn record_retries_exhausted() {
    counter!("gatekeeper_retries_exhausted_total").increment(1);
}

pub fn record_rate_limited(limit: &'static str) {
    counter!("gatekeeper_rate_limited_total", "limit" => limit).increment(1);
}

pub fn record_request_allowed() {
    counter!("gatekeeper_requests_allowed_total").increment(1);
}

pub fn record_request_rejected(category: &'static str) {
    counter!("gatekeeper_requests_rejected_total", "category" => category).increment(1);
}

pub fn set_pool_connections(pool: &str, idle: usize, active: usize) {
    gauge!("gatekeeper_pool_connections", "pool" => pool.to_string(), "state" => "idle")
        .set(idle as f64);
    gauge!("gatekeeper_pool_connections", "pool" => pool.to_string(), "state" => "active")
        .set(active as f64);
}

pub fn record_pool_timeout(pool: &str) {
    counter!("gatekeeper_pool_timeouts_total", "pool" => pool.to_string()).increment(1);
}
