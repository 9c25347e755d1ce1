//! Per-client rate limiting.
//!
//! # Responsibilities
//! - Token bucket per client (burst capacity, steady refill)
//! - Rolling per-minute and per-hour caps on top of the bucket
//! - Bounded waiting for a token
//! - Idle client eviction
//!
//! # Design Decisions
//! - Client state lives in a `DashMap`; the shard lock is never held across `.await`
//! - A denied request consumes nothing and is not recorded in the windows
//! - When several caps are violated the longest to recover is reported

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::RateLimitConfig;
use crate::observability::metrics;

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3_600);
const MIN_WAIT: Duration = Duration::from_millis(1);

/// Which cap denied a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitKind {
    Burst,
    PerMinute,
    PerHour,
}

impl RateLimitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitKind::Burst => "burst",
            RateLimitKind::PerMinute => "per_minute",
            RateLimitKind::PerHour => "per_hour",
        }
    }
}

impl fmt::Display for RateLimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Rate limit exceeded for client '{client_id}' ({limit}), retry after {retry_after:?}")]
pub struct RateLimitExceeded {
    pub client_id: String,
    pub limit: RateLimitKind,
    pub retry_after: Duration,
}

/// A token bucket.
#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, refill_rate: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            capacity,
            refill_rate,
            last_refill: now,
        }
    }

    fn available(&self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        (self.tokens + elapsed * self.refill_rate).min(self.capacity)
    }

    fn refill(&mut self, now: Instant) {
        self.tokens = self.available(now);
        self.last_refill = now;
    }

    /// Time until one whole token is available.
    fn time_to_token(&self) -> Duration {
        let missing = (1.0 - self.tokens).max(0.0);
        Duration::from_secs_f64(missing / self.refill_rate)
    }
}

#[derive(Debug)]
struct ClientRateState {
    bucket: TokenBucket,
    minute: VecDeque<Instant>,
    hour: VecDeque<Instant>,
    last_seen: Instant,
}

impl ClientRateState {
    fn prune(&mut self, now: Instant) {
        prune_window(&mut self.minute, now, MINUTE);
        prune_window(&mut self.hour, now, HOUR);
    }
}

fn prune_window(window: &mut VecDeque<Instant>, now: Instant, span: Duration) {
    while let Some(oldest) = window.front() {
        if now.saturating_duration_since(*oldest) >= span {
            window.pop_front();
        } else {
            break;
        }
    }
}

fn count_within(window: &VecDeque<Instant>, now: Instant, span: Duration) -> usize {
    window
        .iter()
        .filter(|t| now.saturating_duration_since(**t) < span)
        .count()
}

fn window_retry_after(window: &VecDeque<Instant>, now: Instant, span: Duration) -> Duration {
    window
        .front()
        .map(|oldest| (*oldest + span).saturating_duration_since(now))
        .unwrap_or_default()
}

/// Point-in-time view of one client's limits.
#[derive(Debug, Clone, Serialize)]
pub struct ClientRateStats {
    pub client_id: String,
    pub tokens: f64,
    pub capacity: f64,
    pub requests_last_minute: usize,
    pub requests_last_hour: usize,
    pub minute_limit: u32,
    pub hour_limit: u32,
}

/// Per-client rate limiter.
pub struct RateLimiter {
    name: String,
    config: RateLimitConfig,
    clients: DashMap<String, ClientRateState>,
}

impl RateLimiter {
    pub fn new(name: impl Into<String>, config: &RateLimitConfig) -> Self {
        Self {
            name: name.into(),
            config: config.clone(),
            clients: DashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn allow(&self, client_id: &str) -> bool {
        self.check(client_id).is_ok()
    }

    /// Take one request's worth of budget for `client_id`, or report the violated cap.
    pub fn check(&self, client_id: &str) -> Result<(), RateLimitExceeded> {
        let result = self.try_acquire(client_id);
        if let Err(e) = &result {
            tracing::warn!(
                limiter = %self.name,
                client = %client_id,
                limit = %e.limit,
                retry_after_ms = e.retry_after.as_millis() as u64,
                "Rate limit exceeded"
            );
            metrics::record_rate_limited(e.limit.as_str());
        }
        result
    }

    /// Wait until a token is available, at most `timeout`.
    pub async fn wait_for_token(
        &self,
        client_id: &str,
        timeout: Duration,
    ) -> Result<(), RateLimitExceeded> {
        let deadline = Instant::now() + timeout;
        loop {
            let denied = match self.try_acquire(client_id) {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                tracing::warn!(
                    limiter = %self.name,
                    client = %client_id,
                    limit = %denied.limit,
                    "Timed out waiting for rate limit token"
                );
                metrics::record_rate_limited(denied.limit.as_str());
                return Err(denied);
            }
            tokio::time::sleep(denied.retry_after.max(MIN_WAIT).min(remaining)).await;
        }
    }

    pub fn stats(&self, client_id: &str) -> Option<ClientRateStats> {
        let now = Instant::now();
        let state = self.clients.get(client_id)?;
        Some(ClientRateStats {
            client_id: client_id.to_string(),
            tokens: state.bucket.available(now),
            capacity: state.bucket.capacity,
            requests_last_minute: count_within(&state.minute, now, MINUTE),
            requests_last_hour: count_within(&state.hour, now, HOUR),
            minute_limit: self.config.requests_per_minute,
            hour_limit: self.config.requests_per_hour,
        })
    }

    /// Forget everything about `client_id`.
    pub fn reset(&self, client_id: &str) {
        self.clients.remove(client_id);
    }

    /// Drop clients not seen within `ttl`. Returns how many were removed.
    pub fn evict_idle(&self, ttl: Duration) -> usize {
        let now = Instant::now();
        let before = self.clients.len();
        self.clients
            .retain(|_, state| now.saturating_duration_since(state.last_seen) < ttl);
        let evicted = before.saturating_sub(self.clients.len());
        if evicted > 0 {
            tracing::debug!(limiter = %self.name, evicted, "Evicted idle rate limit clients");
        }
        evicted
    }

    /// Drop clients idle longer than the configured client TTL.
    pub fn evict_stale(&self) -> usize {
        self.evict_idle(self.config.client_idle())
    }

    fn try_acquire(&self, client_id: &str) -> Result<(), RateLimitExceeded> {
        if !self.config.enabled {
            return Ok(());
        }

        let now = Instant::now();
        let mut state = self
            .clients
            .entry(client_id.to_string())
            .or_insert_with(|| ClientRateState {
                bucket: TokenBucket::new(
                    self.config.burst_size as f64,
                    self.config.requests_per_second,
                    now,
                ),
                minute: VecDeque::new(),
                hour: VecDeque::new(),
                last_seen: now,
            });

        state.last_seen = now;
        state.bucket.refill(now);
        state.prune(now);

        let denied = |limit, retry_after| RateLimitExceeded {
            client_id: client_id.to_string(),
            limit,
            retry_after,
        };

        if state.hour.len() >= self.config.requests_per_hour as usize {
            return Err(denied(
                RateLimitKind::PerHour,
                window_retry_after(&state.hour, now, HOUR),
            ));
        }
        if state.minute.len() >= self.config.requests_per_minute as usize {
            return Err(denied(
                RateLimitKind::PerMinute,
                window_retry_after(&state.minute, now, MINUTE),
            ));
        }
        if state.bucket.tokens < 1.0 {
            return Err(denied(RateLimitKind::Burst, state.bucket.time_to_token()));
        }

        state.bucket.tokens -= 1.0;
        state.minute.push_back(now);
        state.hour.push_back(now);
        Ok(())
    }
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("name", &self.name)
            .field("enabled", &self.config.enabled)
            .field("clients", &self.clients.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(burst: u32, rps: f64, per_minute: u32, per_hour: u32) -> RateLimitConfig {
        RateLimitConfig {
            enabled: true,
            requests_per_second: rps,
            burst_size: burst,
            requests_per_minute: per_minute,
            requests_per_hour: per_hour,
            client_idle_secs: 3_600,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_refill() {
        let limiter = RateLimiter::new("test", &config(10, 2.0, 1_000, 10_000));

        for _ in 0..10 {
            assert!(limiter.allow("alice"));
        }
        let err = limiter.check("alice").unwrap_err();
        assert_eq!(err.limit, RateLimitKind::Burst);
        assert_eq!(err.retry_after, Duration::from_millis(500));

        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(limiter.allow("alice"));
        assert!(!limiter.allow("alice"));

        // other clients have their own bucket
        assert!(limiter.allow("bob"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_denied_request_consumes_nothing() {
        let limiter = RateLimiter::new("test", &config(2, 1.0, 1_000, 10_000));
        assert!(limiter.allow("alice"));
        assert!(limiter.allow("alice"));
        for _ in 0..5 {
            assert!(!limiter.allow("alice"));
        }
        let stats = limiter.stats("alice").unwrap();
        assert_eq!(stats.requests_last_minute, 2);
        assert_eq!(stats.requests_last_hour, 2);
        assert!(stats.tokens < 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_minute_cap() {
        let limiter = RateLimiter::new("test", &config(100, 100.0, 3, 1_000));
        for _ in 0..3 {
            assert!(limiter.allow("alice"));
            tokio::time::advance(Duration::from_secs(1)).await;
        }
        let err = limiter.check("alice").unwrap_err();
        assert_eq!(err.limit, RateLimitKind::PerMinute);
        assert_eq!(err.retry_after, Duration::from_secs(57));

        tokio::time::advance(Duration::from_secs(57)).await;
        assert!(limiter.allow("alice"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hour_cap_takes_precedence() {
        // hour and minute caps are both reached; burst bucket is empty too
        let limiter = RateLimiter::new("test", &config(2, 0.001, 2, 2));
        assert!(limiter.allow("alice"));
        assert!(limiter.allow("alice"));

        let err = limiter.check("alice").unwrap_err();
        assert_eq!(err.limit, RateLimitKind::PerHour);
        assert_eq!(err.retry_after, HOUR);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_token() {
        let limiter = RateLimiter::new("test", &config(1, 2.0, 1_000, 10_000));
        assert!(limiter.allow("alice"));

        let started = Instant::now();
        limiter
            .wait_for_token("alice", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(started.elapsed(), Duration::from_millis(500));

        let err = limiter
            .wait_for_token("alice", Duration::from_millis(100))
            .await
            .unwrap_err();
        assert_eq!(err.limit, RateLimitKind::Burst);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_and_evict() {
        let limiter = RateLimiter::new("test", &config(1, 0.001, 10, 10));
        assert!(limiter.allow("alice"));
        assert!(!limiter.allow("alice"));
        limiter.reset("alice");
        assert!(limiter.stats("alice").is_none());
        assert!(limiter.allow("alice"));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(limiter.allow("bob"));
        assert_eq!(limiter.evict_idle(Duration::from_secs(5)), 1);
        assert!(limiter.stats("alice").is_none());
        assert!(limiter.stats("bob").is_some());

        // configured TTL is an hour
        assert_eq!(limiter.evict_stale(), 0);
        tokio::time::advance(Duration::from_secs(3_600)).await;
        assert_eq!(limiter.evict_stale(), 1);
    }

    #[test]
    fn test_disabled_always_allows() {
        let mut cfg = config(1, 1.0, 1, 1);
        cfg.enabled = false;
        let limiter = RateLimiter::new("test", &cfg);
        assert!((0..100).all(|_| limiter.allow("alice")));
        assert_eq!(limiter.client_count(), 0);
    }
}
