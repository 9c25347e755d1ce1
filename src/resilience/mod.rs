//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to a dependency:
//!     → circuit_breaker.rs (fail fast if the dependency is known to be down)
//!     → retries.rs (re-run transient failures with backoff.rs delays)
//!     → dependency call, result lifted into outcome.rs `CallError`
//! ```
//!
//! # Design Decisions
//! - Retry-vs-fatal is an explicit value (`CallError`), decided at the call site
//! - A circuit-open rejection is never retried
//! - Circuit breaker prevents cascading failures
//! - All resilience logic is composable (compose.rs)

pub mod backoff;
pub mod circuit_breaker;
pub mod compose;
pub mod outcome;
pub mod retries;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerStats, CircuitOpenError, CircuitState};
pub use compose::{with_circuit_breaker, with_retry};
pub use outcome::{classify, CallError};
pub use retries::{RetryExecutor, RetryPolicy};
