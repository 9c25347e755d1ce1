//! Single entrypoint for request admission.
//!
//! Order of checks: rate limit, request envelope, SQL fields, path fields.
//! The first failure wins; every decision is counted per client.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::config::{GuardConfig, RequestConfig};
use crate::error::GuardError;
use crate::observability::metrics;
use crate::security::limits::RequestValidator;
use crate::security::path::PathValidator;
use crate::security::rate_limit::{ClientRateStats, RateLimiter};
use crate::security::rules::{Severity, ValidationCategory, ValidationError};
use crate::security::sql::SqlValidator;
use crate::security::stats::{ClientSecurityStats, SecurityStats, SecuritySummary};

/// Outcome of `SecurityManager::validate_request`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecurityDecision {
    pub allowed: bool,
    pub reason: Option<String>,
    pub category: Option<ValidationCategory>,
}

impl SecurityDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            category: None,
        }
    }

    pub fn deny(category: ValidationCategory, reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            category: Some(category),
        }
    }
}

/// Everything known about one client.
#[derive(Debug, Clone, Serialize)]
pub struct ClientReport {
    pub client_id: String,
    pub security: ClientSecurityStats,
    pub rate_limit: Option<ClientRateStats>,
}

pub struct SecurityManager {
    rate_limiter: Arc<RateLimiter>,
    request: RequestValidator,
    sql: SqlValidator,
    path: PathValidator,
    sql_fields: Vec<String>,
    path_fields: Vec<String>,
    stats: SecurityStats,
}

impl SecurityManager {
    pub fn new(config: &GuardConfig, rate_limiter: Arc<RateLimiter>) -> Self {
        let RequestConfig {
            sql_fields,
            path_fields,
            ..
        } = &config.request;
        Self {
            rate_limiter,
            request: RequestValidator::new(&config.request),
            sql: SqlValidator::new(&config.sql),
            path: PathValidator::new(&config.path),
            sql_fields: sql_fields.clone(),
            path_fields: path_fields.clone(),
            stats: SecurityStats::new(),
        }
    }

    /// Build a manager with its own rate limiter.
    pub fn from_config(config: &GuardConfig) -> Self {
        let limiter = Arc::new(RateLimiter::new("security", &config.rate_limit));
        Self::new(config, limiter)
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    pub fn sql_validator(&self) -> &SqlValidator {
        &self.sql
    }

    pub fn path_validator(&self) -> &PathValidator {
        &self.path
    }

    pub fn validate_request(&self, client_id: &str, payload: &Value) -> SecurityDecision {
        match self.enforce(client_id, payload) {
            Ok(()) => SecurityDecision::allow(),
            Err(GuardError::RateLimited(e)) => {
                SecurityDecision::deny(ValidationCategory::RateLimit, e.to_string())
            }
            Err(GuardError::Validation(e)) => SecurityDecision::deny(e.category, e.reason),
            Err(other) => SecurityDecision::deny(ValidationCategory::Shape, other.to_string()),
        }
    }

    /// Typed variant of `validate_request`.
    pub fn enforce(&self, client_id: &str, payload: &Value) -> Result<(), GuardError> {
        if let Err(e) = self.rate_limiter.check(client_id) {
            self.record_rejection(client_id, ValidationCategory::RateLimit, &e.to_string());
            return Err(e.into());
        }

        if let Err(e) = self.validate_payload(payload) {
            self.record_rejection(client_id, e.category, &e.reason);
            return Err(e.into());
        }

        self.stats.record_allowed(client_id);
        metrics::record_request_allowed();
        Ok(())
    }

    pub fn get_client_stats(&self, client_id: &str) -> ClientReport {
        ClientReport {
            client_id: client_id.to_string(),
            security: self.stats.client(client_id),
            rate_limit: self.rate_limiter.stats(client_id),
        }
    }

    pub fn summary(&self) -> SecuritySummary {
        self.stats.summary()
    }

    /// Drop per-client counters and rate limit state idle for `ttl`.
    /// Returns the number of clients removed from the counters.
    pub fn evict_idle(&self, ttl: Duration) -> usize {
        let evicted = self.stats.evict_idle(ttl);
        let limiter = self.rate_limiter.evict_idle(ttl);
        if evicted > 0 || limiter > 0 {
            tracing::debug!(stats = evicted, limiter, "Evicted idle security clients");
        }
        evicted
    }

    fn validate_payload(&self, payload: &Value) -> Result<(), ValidationError> {
        self.request.validate(payload)?;

        for field in &self.sql_fields {
            if let Some(query) = string_field(payload, field)? {
                self.sql.validate(query)?;
            }
        }
        for field in &self.path_fields {
            if let Some(path) = string_field(payload, field)? {
                self.path.validate(path)?;
            }
        }
        Ok(())
    }

    fn record_rejection(&self, client_id: &str, category: ValidationCategory, reason: &str) {
        tracing::warn!(client = %client_id, category = %category, reason = %reason, "Request rejected");
        self.stats.record_blocked(client_id, category);
        metrics::record_request_rejected(category.as_str());
    }
}

/// A present, non-null field must be a string.
fn string_field<'a>(payload: &'a Value, field: &str) -> Result<Option<&'a str>, ValidationError> {
    match payload.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(ValidationError::new(
            ValidationCategory::Shape,
            Severity::Low,
            format!("Field '{field}' must be a string"),
        )),
    }
}
