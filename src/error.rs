//! Boundary error taxonomy.
//!
//! # Design Decisions
//! - Every error the host can observe is a distinct type
//! - `Disposition` tells the host which protocol response to map to
//! - No transport types leak into this crate

use thiserror::Error;

use crate::config::loader::ConfigError;
use crate::pool::PoolError;
use crate::resilience::circuit_breaker::CircuitOpenError;
use crate::security::rate_limit::RateLimitExceeded;
use crate::security::rules::ValidationError;

/// How the host should surface an error to its own callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Dependency temporarily unavailable (503).
    Unavailable,
    /// Client exceeded its rate limits (429).
    TooManyRequests,
    /// Request rejected by validation (400).
    BadRequest,
    /// Anything else (500).
    Internal,
}

/// Errors raised at the crate boundary.
#[derive(Debug, Error)]
pub enum GuardError {
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    RateLimited(#[from] RateLimitExceeded),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl GuardError {
    pub fn disposition(&self) -> Disposition {
        match self {
            GuardError::CircuitOpen(_) | GuardError::Pool(_) => Disposition::Unavailable,
            GuardError::RateLimited(_) => Disposition::TooManyRequests,
            GuardError::Validation(_) => Disposition::BadRequest,
            GuardError::Config(_) => Disposition::Internal,
        }
    }
}
