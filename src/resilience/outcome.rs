//! Explicit outcome of a guarded unit of work.
//!
//! A unit of work resolves to `Result<T, CallError<E>>`: `Ok` is success and
//! each error variant says what the guards should do next. Retry-vs-fatal is a
//! value decided at the call site, never inferred from an error hierarchy.

use thiserror::Error;

use crate::error::Disposition;
use crate::resilience::circuit_breaker::CircuitOpenError;

#[derive(Debug, Error)]
pub enum CallError<E> {
    /// Transient dependency failure; another attempt may succeed.
    #[error("retryable failure: {0}")]
    Retryable(E),

    /// Dependency failure that retrying cannot fix.
    #[error("{0}")]
    Fatal(E),

    /// A circuit breaker rejected the call without running it.
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    /// Every attempt failed; `last` is the final attempt's error.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetryExhausted { attempts: u32, last: E },

    /// The sequence was abandoned before completing.
    #[error("operation cancelled")]
    Cancelled,
}

impl<E> CallError<E> {
    pub fn is_retryable(&self) -> bool {
        matches!(self, CallError::Retryable(_))
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, CallError::CircuitOpen(_))
    }

    /// Whether a circuit breaker should count this as a dependency failure.
    ///
    /// Rejections from nested breakers and cancellations are not failures of
    /// the dependency itself.
    pub fn counts_as_failure(&self) -> bool {
        matches!(
            self,
            CallError::Retryable(_) | CallError::Fatal(_) | CallError::RetryExhausted { .. }
        )
    }

    /// The dependency's own error, if this outcome carries one.
    pub fn into_inner(self) -> Option<E> {
        match self {
            CallError::Retryable(e) | CallError::Fatal(e) => Some(e),
            CallError::RetryExhausted { last, .. } => Some(last),
            CallError::CircuitOpen(_) | CallError::Cancelled => None,
        }
    }

    pub fn inner(&self) -> Option<&E> {
        match self {
            CallError::Retryable(e) | CallError::Fatal(e) => Some(e),
            CallError::RetryExhausted { last, .. } => Some(last),
            CallError::CircuitOpen(_) | CallError::Cancelled => None,
        }
    }

    pub fn disposition(&self) -> Disposition {
        match self {
            CallError::CircuitOpen(_)
            | CallError::RetryExhausted { .. }
            | CallError::Retryable(_) => Disposition::Unavailable,
            CallError::Fatal(_) | CallError::Cancelled => Disposition::Internal,
        }
    }
}

/// Lift a raw dependency result into a unit-of-work outcome.
///
/// Errors accepted by `retry_on` become `Retryable`, everything else `Fatal`.
pub fn classify<T, E, P>(result: Result<T, E>, retry_on: P) -> Result<T, CallError<E>>
where
    P: FnOnce(&E) -> bool,
{
    result.map_err(|e| {
        if retry_on(&e) {
            CallError::Retryable(e)
        } else {
            CallError::Fatal(e)
        }
    })
}
