//! Retry logic.
//!
//! # Responsibilities
//! - Re-run a unit of work while it reports `Retryable` failures
//! - Sleep a jittered exponential backoff between attempts
//! - Stop on success, on any non-retryable outcome, or when attempts run out
//!
//! # Design Decisions
//! - `CircuitOpen` is never retried; it propagates unwrapped on first sight
//! - Jittered backoff prevents synchronized retry storms
//! - The sleep holds no lock; dropping the future abandons the sequence
//! - `execute_until` turns a shutdown signal into `Cancelled`, which is never retried

use std::future::{self, Future};
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::broadcast;

use crate::config::RetryConfig;
use crate::observability::metrics;
use crate::resilience::backoff::{base_backoff, calculate_backoff};
use crate::resilience::outcome::{classify, CallError};

/// Attempt budget and backoff schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Inclusive range the jitter multiplier is drawn from.
    pub jitter: (f64, f64),
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            jitter: (0.5, 1.5),
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: (config.jitter_min, config.jitter_max),
        }
    }

    /// Set the jitter range. Non-finite or inverted bounds are ignored.
    pub fn with_jitter(mut self, low: f64, high: f64) -> Self {
        if low.is_finite() && high.is_finite() && low >= 0.0 && low <= high {
            self.jitter = (low, high);
        } else {
            tracing::warn!(low, high, "Ignoring invalid jitter range");
        }
        self
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Runs units of work under a [`RetryPolicy`].
pub struct RetryExecutor {
    policy: RetryPolicy,
    rng: Mutex<StdRng>,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Executor with a deterministic jitter sequence.
    pub fn with_seed(policy: RetryPolicy, seed: u64) -> Self {
        Self {
            policy,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Jittered delay before `attempt` (1-based; attempt 1 never waits).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let mut rng = self.rng.lock();
        calculate_backoff(
            attempt,
            self.policy.base_delay,
            self.policy.max_delay,
            self.policy.jitter,
            &mut *rng,
        )
    }

    /// Un-jittered delay before `attempt`.
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        base_backoff(attempt, self.policy.base_delay, self.policy.max_delay)
    }

    /// Run `op` until it succeeds, fails non-retryably, or attempts run out.
    pub async fn execute<F, Fut, T, E>(&self, mut op: F) -> Result<T, CallError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CallError<E>>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(attempt, "Call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(CallError::Retryable(last)) => {
                    if attempt >= max_attempts {
                        metrics::record_retries_exhausted();
                        tracing::warn!(attempts = attempt, "Retry attempts exhausted");
                        return Err(CallError::RetryExhausted {
                            attempts: attempt,
                            last,
                        });
                    }

                    attempt += 1;
                    let delay = self.delay_for(attempt);
                    metrics::record_retry_attempt();
                    tracing::debug!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(other) => return Err(other),
            }
        }
    }

    /// Run a raw dependency call, retrying errors accepted by `retry_on`.
    pub async fn execute_classified<F, Fut, T, E, P>(
        &self,
        mut op: F,
        retry_on: P,
    ) -> Result<T, CallError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let retry_on = &retry_on;
        self.execute(|| {
            let attempt = op();
            async move { classify(attempt.await, |e| retry_on(e)) }
        })
        .await
    }

    /// Like [`execute`](Self::execute), but abandons the sequence with
    /// `Cancelled` as soon as `shutdown` fires.
    pub async fn execute_until<F, Fut, T, E>(
        &self,
        op: F,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<T, CallError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CallError<E>>>,
    {
        tokio::select! {
            biased;
            _ = wait_for_signal(shutdown) => {
                tracing::debug!("Retry sequence cancelled by shutdown");
                Err(CallError::Cancelled)
            }
            result = self.execute(op) => result,
        }
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

async fn wait_for_signal(rx: &mut broadcast::Receiver<()>) {
    loop {
        match rx.recv().await {
            Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => return,
            // Sender gone without a signal: nothing can cancel us any more.
            Err(broadcast::error::RecvError::Closed) => future::pending::<()>().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::circuit_breaker::CircuitOpenError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn executor(max_attempts: u32) -> RetryExecutor {
        RetryExecutor::with_seed(
            RetryPolicy::new(max_attempts, Duration::from_millis(100), Duration::from_secs(2)),
            1,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();
        let result: Result<u32, CallError<&str>> = executor(5)
            .execute(|| async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(CallError::Retryable("busy"))
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(150), "waited {waited:?}");
        assert!(waited <= Duration::from_millis(450), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_wraps_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), CallError<u32>> = executor(3)
            .execute(|| async { Err(CallError::Retryable(calls.fetch_add(1, Ordering::SeqCst))) })
            .await;

        match result {
            Err(CallError::RetryExhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert_eq!(last, 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), CallError<&str>> = executor(5)
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(CallError::Fatal("permission denied"))
            })
            .await;
        assert!(matches!(result, Err(CallError::Fatal("permission denied"))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_open_propagates_immediately() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();
        let result: Result<(), CallError<&str>> = executor(5)
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(CallError::CircuitOpen(CircuitOpenError {
                    name: "db".into(),
                    retry_after: Duration::from_secs(30),
                }))
            })
            .await;
        assert!(matches!(result, Err(CallError::CircuitOpen(ref e)) if e.name == "db"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_classified_uses_predicate() {
        let calls = AtomicU32::new(0);
        let result: Result<(), CallError<String>> = executor(4)
            .execute_classified(
                || async {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    Err(if n == 0 { "timeout".to_string() } else { "bad query".to_string() })
                },
                |e: &String| e.contains("timeout"),
            )
            .await;
        assert!(matches!(result, Err(CallError::Fatal(ref e)) if e == "bad query"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_sequence() {
        let (tx, mut rx) = broadcast::channel(1);
        let calls = AtomicU32::new(0);
        let exec = RetryExecutor::with_seed(
            RetryPolicy::new(100, Duration::from_secs(1), Duration::from_secs(10)),
            3,
        );

        let sequence = exec.execute_until(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(CallError::Retryable("unavailable"))
            },
            &mut rx,
        );
        let cancel = async {
            tokio::time::sleep(Duration::from_millis(1_200)).await;
            tx.send(()).unwrap();
        };
        let (result, ()) = tokio::join!(sequence, cancel);

        assert!(matches!(result, Err(CallError::Cancelled)));
        let attempts = calls.load(Ordering::SeqCst);
        assert!(attempts >= 1 && attempts <= 2, "attempts {attempts}");

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(calls.load(Ordering::SeqCst), attempts);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_outcome_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), CallError<&str>> = executor(5)
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(CallError::Cancelled)
            })
            .await;
        assert!(matches!(result, Err(CallError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_seeded_delays_respect_cap() {
        let exec = executor(10);
        for attempt in 1..40 {
            assert!(exec.delay_for(attempt) <= Duration::from_secs(2));
            assert!(exec.base_delay_for(attempt) <= exec.base_delay_for(attempt + 1));
        }
        assert_eq!(exec.delay_for(1), Duration::ZERO);
    }

    #[test]
    fn test_invalid_jitter_range_ignored() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(1));
        assert_eq!(policy.clone().with_jitter(0.5, f64::INFINITY).jitter, (0.5, 1.5));
        assert_eq!(policy.clone().with_jitter(2.0, 1.0).jitter, (0.5, 1.5));
        assert_eq!(policy.with_jitter(0.8, 1.2).jitter, (0.8, 1.2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unvalidated_infinite_jitter_does_not_panic() {
        let policy = RetryPolicy::from_config(&RetryConfig {
            max_attempts: 2,
            base_delay_ms: 100,
            max_delay_ms: 1_000,
            jitter_min: 0.5,
            jitter_max: f64::INFINITY,
        });
        let result: Result<(), CallError<&str>> = RetryExecutor::with_seed(policy, 5)
            .execute(|| async { Err(CallError::Retryable("busy")) })
            .await;
        assert!(matches!(result, Err(CallError::RetryExhausted { attempts: 2, .. })));
    }
}
