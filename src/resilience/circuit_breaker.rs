//! Circuit breaker for dependency protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: dependency assumed down, calls fail fast
//! - Half-Open: testing if dependency recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= failure_threshold
//! Open → Half-Open: first call after timeout elapsed
//! Half-Open → Closed: success_threshold consecutive trial successes
//! Half-Open → Open: any trial failure
//! ```
//!
//! # Design Decisions
//! - Per-dependency circuit breaker (not global)
//! - Fail fast in Open state (the wrapped call is never invoked)
//! - Single trial in Half-Open (prevents hammering recovering dependency)
//! - Every read-check-transition happens under one lock, never held across `.await`
//! - Results are tagged with the epoch they were admitted in; results from a
//!   previous epoch are ignored so a slow call cannot undo a newer transition

use std::fmt;
use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::BreakerConfig;
use crate::observability::metrics;
use crate::resilience::outcome::CallError;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The circuit rejected a call without invoking it.
#[derive(Debug, Clone, Error)]
#[error("circuit '{name}' is open; retry after {retry_after:?}")]
pub struct CircuitOpenError {
    pub name: String,
    /// Time until the breaker will admit a trial call. Zero while a trial is in flight.
    pub retry_after: Duration,
}

/// Point-in-time view of a breaker, for monitoring.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub timeout_ms: u64,
    pub open_for_ms: Option<u64>,
    pub total_calls: u64,
    pub total_failures: u64,
    pub total_rejections: u64,
    pub transitions: u64,
}

struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
    epoch: u64,
    last_activity: Instant,
    total_calls: u64,
    total_failures: u64,
    total_rejections: u64,
    transitions: u64,
}

#[derive(Debug, Clone, Copy)]
struct Ticket {
    epoch: u64,
    trial: bool,
}

/// Releases the half-open trial slot if the trial future is dropped mid-flight.
struct TrialSlot<'a> {
    breaker: &'a CircuitBreaker,
    ticket: Ticket,
    armed: bool,
}

impl Drop for TrialSlot<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut s = self.breaker.inner.lock();
            release_trial(&mut s, self.ticket);
        }
    }
}

fn release_trial(s: &mut BreakerState, ticket: Ticket) {
    if ticket.trial && s.epoch == ticket.epoch {
        s.trial_in_flight = false;
    }
}

/// Failure-tracking state machine guarding a single named dependency.
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    success_threshold: u32,
    timeout: Duration,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Create a closed breaker. Thresholds below 1 and a zero timeout are raised
    /// to their minimum.
    pub fn new(name: impl Into<String>, config: &BreakerConfig) -> Self {
        Self {
            name: name.into(),
            failure_threshold: config.failure_threshold.max(1),
            success_threshold: config.success_threshold.max(1),
            timeout: config.timeout().max(Duration::from_millis(1)),
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                opened_at: None,
                trial_in_flight: false,
                epoch: 0,
                last_activity: Instant::now(),
                total_calls: 0,
                total_failures: 0,
                total_rejections: 0,
                transitions: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    pub fn success_count(&self) -> u32 {
        self.inner.lock().success_count
    }

    /// Time since the breaker last admitted or rejected a call.
    pub fn idle_for(&self) -> Duration {
        Instant::now().saturating_duration_since(self.inner.lock().last_activity)
    }

    /// Run `op` through the breaker, counting every dependency failure.
    pub async fn call<F, Fut, T, E>(&self, op: F) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, CallError<E>>>,
    {
        self.call_filtered(op, |e: &CallError<E>| e.counts_as_failure())
            .await
    }

    /// Run `op` through the breaker, counting only errors `is_failure` accepts.
    ///
    /// Errors the predicate rejects propagate without touching the counters.
    pub async fn call_filtered<F, Fut, T, E, P>(
        &self,
        op: F,
        is_failure: P,
    ) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, CallError<E>>>,
        P: FnOnce(&CallError<E>) -> bool,
    {
        let ticket = self.admit().map_err(CallError::CircuitOpen)?;
        let mut slot = TrialSlot {
            breaker: self,
            ticket,
            armed: ticket.trial,
        };

        let result = op().await;
        slot.armed = false;

        let counted = result.as_ref().err().map(is_failure);
        match counted {
            None => self.on_success(ticket),
            Some(true) => self.on_failure(ticket),
            Some(false) => release_trial(&mut self.inner.lock(), ticket),
        }
        result
    }

    /// Force the breaker closed with all counters zeroed.
    pub fn reset(&self) {
        let mut s = self.inner.lock();
        if s.state != CircuitState::Closed {
            self.transition(&mut s, CircuitState::Closed);
        } else {
            s.failure_count = 0;
            s.success_count = 0;
            s.epoch += 1;
        }
        tracing::info!(breaker = %self.name, "Circuit breaker manually reset");
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let s = self.inner.lock();
        CircuitBreakerStats {
            name: self.name.clone(),
            state: s.state,
            failure_count: s.failure_count,
            success_count: s.success_count,
            failure_threshold: self.failure_threshold,
            success_threshold: self.success_threshold,
            timeout_ms: self.timeout.as_millis() as u64,
            open_for_ms: s
                .opened_at
                .map(|at| Instant::now().saturating_duration_since(at).as_millis() as u64),
            total_calls: s.total_calls,
            total_failures: s.total_failures,
            total_rejections: s.total_rejections,
            transitions: s.transitions,
        }
    }

    fn admit(&self) -> Result<Ticket, CircuitOpenError> {
        let mut s = self.inner.lock();
        let now = Instant::now();
        s.last_activity = now;

        match s.state {
            CircuitState::Closed => {}
            CircuitState::Open => {
                let elapsed = s
                    .opened_at
                    .map(|at| now.saturating_duration_since(at))
                    .unwrap_or(self.timeout);
                if elapsed < self.timeout {
                    return Err(self.reject(&mut s, self.timeout - elapsed));
                }
                self.transition(&mut s, CircuitState::HalfOpen);
            }
            CircuitState::HalfOpen => {
                if s.trial_in_flight {
                    return Err(self.reject(&mut s, Duration::ZERO));
                }
            }
        }

        s.total_calls += 1;
        let trial = s.state == CircuitState::HalfOpen;
        if trial {
            s.trial_in_flight = true;
        }
        Ok(Ticket {
            epoch: s.epoch,
            trial,
        })
    }

    fn reject(&self, s: &mut BreakerState, retry_after: Duration) -> CircuitOpenError {
        s.total_rejections += 1;
        metrics::record_circuit_rejected(&self.name);
        tracing::debug!(breaker = %self.name, state = %s.state, "Call rejected by open circuit");
        CircuitOpenError {
            name: self.name.clone(),
            retry_after,
        }
    }

    fn on_success(&self, ticket: Ticket) {
        let mut s = self.inner.lock();
        if s.epoch != ticket.epoch {
            return;
        }
        match s.state {
            CircuitState::Closed => s.failure_count = 0,
            CircuitState::HalfOpen => {
                s.trial_in_flight = false;
                s.success_count += 1;
                if s.success_count >= self.success_threshold {
                    self.transition(&mut s, CircuitState::Closed);
                }
            }
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self, ticket: Ticket) {
        let mut s = self.inner.lock();
        s.total_failures += 1;
        if s.epoch != ticket.epoch {
            return;
        }
        match s.state {
            CircuitState::Closed => {
                s.failure_count += 1;
                if s.failure_count >= self.failure_threshold {
                    self.transition(&mut s, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => self.transition(&mut s, CircuitState::Open),
            CircuitState::Open => {}
        }
    }

    fn transition(&self, s: &mut BreakerState, to: CircuitState) {
        let from = s.state;
        s.state = to;
        s.epoch += 1;
        s.transitions += 1;
        s.success_count = 0;
        s.trial_in_flight = false;

        match to {
            CircuitState::Closed => {
                s.failure_count = 0;
                s.opened_at = None;
                tracing::info!(breaker = %self.name, %from, "Circuit breaker closed");
            }
            CircuitState::Open => {
                s.opened_at = Some(Instant::now());
                tracing::warn!(
                    breaker = %self.name,
                    %from,
                    failures = s.failure_count,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Circuit breaker opened"
                );
            }
            CircuitState::HalfOpen => {
                tracing::info!(breaker = %self.name, "Circuit breaker half-open, admitting trial call");
            }
        }
        metrics::record_circuit_transition(&self.name, to.as_str());
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}
