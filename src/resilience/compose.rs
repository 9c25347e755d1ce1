//! Composable wrappers around units of work.
//!
//! A unit of work is any `Fn() -> Future<Output = Result<T, CallError<E>>>`.
//! Each wrapper takes one and returns another of the same shape, so guards
//! stack in any order:
//!
//! ```text
//! with_circuit_breaker(breaker, with_retry(executor, dependency_call))
//! ```
//!
//! Breaker-outermost is the recommended order: the breaker sees one outcome per
//! retry sequence, and a circuit-open rejection is never retried. With the retry
//! outermost, a `CircuitOpen` from the inner breaker still ends the sequence.

use std::future::Future;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};

use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::resilience::outcome::CallError;
use crate::resilience::retries::RetryExecutor;

/// Wrap `op` so every invocation runs a full retry sequence.
pub fn with_retry<F, Fut, T, E>(
    executor: Arc<RetryExecutor>,
    op: F,
) -> impl Fn() -> BoxFuture<'static, Result<T, CallError<E>>> + Send + Sync + 'static
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, CallError<E>>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    let op = Arc::new(op);
    move || {
        let executor = executor.clone();
        let op = op.clone();
        async move { executor.execute(|| op()).await }.boxed()
    }
}

/// Wrap `op` so every invocation passes through `breaker`.
pub fn with_circuit_breaker<F, Fut, T, E>(
    breaker: Arc<CircuitBreaker>,
    op: F,
) -> impl Fn() -> BoxFuture<'static, Result<T, CallError<E>>> + Send + Sync + 'static
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, CallError<E>>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    let op = Arc::new(op);
    move || {
        let breaker = breaker.clone();
        let op = op.clone();
        async move { breaker.call(|| op()).await }.boxed()
    }
}
