//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds >= 1, delays consistent)
//! - Detect settings that would make a guard useless
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GuardConfig → Result<(), Vec<InvalidSetting>>
//! - Runs before config is accepted into the system

use std::fmt;

use crate::config::schema::GuardConfig;

/// A single semantic problem with a configuration value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidSetting {
    pub field: &'static str,
    pub message: String,
}

impl InvalidSetting {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for InvalidSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a configuration, collecting every problem found.
pub fn validate_config(config: &GuardConfig) -> Result<(), Vec<InvalidSetting>> {
    let mut errors = Vec::new();

    let cb = &config.circuit_breaker;
    if cb.failure_threshold == 0 {
        errors.push(InvalidSetting::new("circuit_breaker.failure_threshold", "must be >= 1"));
    }
    if cb.success_threshold == 0 {
        errors.push(InvalidSetting::new("circuit_breaker.success_threshold", "must be >= 1"));
    }
    if cb.timeout_ms == 0 {
        errors.push(InvalidSetting::new("circuit_breaker.timeout_ms", "must be > 0"));
    }

    let retries = &config.retries;
    if retries.max_attempts == 0 {
        errors.push(InvalidSetting::new("retries.max_attempts", "must be >= 1"));
    }
    if retries.max_delay_ms < retries.base_delay_ms {
        errors.push(InvalidSetting::new(
            "retries.max_delay_ms",
            format!("must be >= base_delay_ms ({})", retries.base_delay_ms),
        ));
    }
    if !(retries.jitter_min.is_finite() && retries.jitter_max.is_finite()) {
        errors.push(InvalidSetting::new(
            "retries.jitter_max",
            "jitter bounds must be finite",
        ));
    } else if !(retries.jitter_min > 0.0 && retries.jitter_min <= retries.jitter_max) {
        errors.push(InvalidSetting::new(
            "retries.jitter_min",
            "must be > 0 and <= jitter_max",
        ));
    }

    let pool = &config.pool;
    if pool.max_size == 0 {
        errors.push(InvalidSetting::new("pool.max_size", "must be >= 1"));
    }
    if pool.min_size > pool.max_size {
        errors.push(InvalidSetting::new(
            "pool.min_size",
            format!("must be <= max_size ({})", pool.max_size),
        ));
    }

    let rl = &config.rate_limit;
    if rl.enabled {
        if !(rl.requests_per_second.is_finite() && rl.requests_per_second > 0.0) {
            errors.push(InvalidSetting::new("rate_limit.requests_per_second", "must be > 0"));
        }
        if rl.burst_size == 0 {
            errors.push(InvalidSetting::new("rate_limit.burst_size", "must be >= 1"));
        }
        if rl.requests_per_minute == 0 {
            errors.push(InvalidSetting::new("rate_limit.requests_per_minute", "must be >= 1"));
        }
        if rl.requests_per_hour < rl.requests_per_minute {
            errors.push(InvalidSetting::new(
                "rate_limit.requests_per_hour",
                "must be >= requests_per_minute",
            ));
        }
    }

    if config.sql.allowed_keywords.is_empty() {
        errors.push(InvalidSetting::new(
            "sql.allowed_keywords",
            "must list at least one keyword",
        ));
    }
    if config.sql.max_query_length == 0 {
        errors.push(InvalidSetting::new("sql.max_query_length", "must be > 0"));
    }

    if config.request.max_request_bytes == 0 {
        errors.push(InvalidSetting::new("request.max_request_bytes", "must be > 0"));
    }
    if config.request.max_depth == 0 {
        errors.push(InvalidSetting::new("request.max_depth", "must be >= 1"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
