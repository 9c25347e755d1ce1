//! Named shared resources.
//!
//! # Responsibilities
//! - Get-or-create circuit breakers and rate limiters by name
//! - Hold explicitly constructed connection pools by name
//! - Own the shutdown signal that cancels in-flight retry sequences
//! - Evict idle per-name state
//!
//! # Design Decisions
//! - Passed around as `Arc<Registry>`, never a global
//! - `DashMap::entry` makes concurrent first use create exactly one instance
//! - Pools are never created implicitly; they are registered by handle

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::config::{BreakerConfig, GuardConfig};
use crate::lifecycle::Shutdown;
use crate::pool::{ManagedPool, PoolStats};
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerStats, CircuitState};
use crate::resilience::compose;
use crate::resilience::outcome::CallError;
use crate::resilience::retries::{RetryExecutor, RetryPolicy};
use crate::security::manager::SecurityManager;
use crate::security::rate_limit::RateLimiter;

/// Snapshot of every registered resource.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub breakers: Vec<CircuitBreakerStats>,
    pub pools: Vec<PoolStats>,
    pub rate_limiters: Vec<RateLimiterSummary>,
    pub shutting_down: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RateLimiterSummary {
    pub name: String,
    pub enabled: bool,
    pub clients: usize,
}

pub struct Registry {
    config: GuardConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    limiters: DashMap<String, Arc<RateLimiter>>,
    pools: DashMap<String, Arc<dyn ManagedPool>>,
    retries: Arc<RetryExecutor>,
    shutdown: Shutdown,
}

impl Registry {
    pub fn new(config: GuardConfig) -> Self {
        let retries = Arc::new(RetryExecutor::new(RetryPolicy::from_config(&config.retries)));
        Self {
            config,
            breakers: DashMap::new(),
            limiters: DashMap::new(),
            pools: DashMap::new(),
            retries,
            shutdown: Shutdown::new(),
        }
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// Breaker for `name`, created with the default breaker settings on first use.
    pub fn circuit_breaker(&self, name: &str) -> Arc<CircuitBreaker> {
        self.circuit_breaker_with(name, &self.config.circuit_breaker)
    }

    /// Breaker for `name`. `config` only applies if the breaker does not exist yet.
    pub fn circuit_breaker_with(&self, name: &str, config: &BreakerConfig) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(name) {
            return existing.clone();
        }
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::debug!(breaker = %name, "Creating circuit breaker");
                Arc::new(CircuitBreaker::new(name, config))
            })
            .clone()
    }

    /// Rate limiter for `name`, created with the configured limits on first use.
    pub fn rate_limiter(&self, name: &str) -> Arc<RateLimiter> {
        if let Some(existing) = self.limiters.get(name) {
            return existing.clone();
        }
        self.limiters
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::debug!(limiter = %name, "Creating rate limiter");
                Arc::new(RateLimiter::new(name, &self.config.rate_limit))
            })
            .clone()
    }

    /// Shared retry executor built from the retry settings.
    pub fn retry_executor(&self) -> Arc<RetryExecutor> {
        self.retries.clone()
    }

    /// Security manager sharing this registry's `security` rate limiter.
    pub fn security_manager(&self) -> SecurityManager {
        SecurityManager::new(&self.config, self.rate_limiter("security"))
    }

    /// Register a pool. Returns `false` if a pool with that name already exists.
    pub fn register_pool(&self, pool: Arc<dyn ManagedPool>) -> bool {
        match self.pools.entry(pool.name().to_string()) {
            Entry::Occupied(_) => {
                tracing::warn!(pool = %pool.name(), "Pool already registered");
                false
            }
            Entry::Vacant(slot) => {
                tracing::info!(pool = %pool.name(), "Pool registered");
                slot.insert(pool);
                true
            }
        }
    }

    pub fn pool(&self, name: &str) -> Option<Arc<dyn ManagedPool>> {
        self.pools.get(name).map(|p| p.clone())
    }

    pub fn pool_stats(&self, name: &str) -> Option<PoolStats> {
        self.pools.get(name).map(|p| p.stats())
    }

    /// Stats for the breaker named `name`, if it exists.
    pub fn get_stats(&self, name: &str) -> Option<CircuitBreakerStats> {
        self.breakers.get(name).map(|b| b.stats())
    }

    pub fn all_stats(&self) -> RegistryStats {
        let mut breakers: Vec<_> = self.breakers.iter().map(|b| b.stats()).collect();
        breakers.sort_by(|a, b| a.name.cmp(&b.name));
        let mut pools: Vec<_> = self.pools.iter().map(|p| p.stats()).collect();
        pools.sort_by(|a, b| a.name.cmp(&b.name));
        let mut rate_limiters: Vec<_> = self
            .limiters
            .iter()
            .map(|l| RateLimiterSummary {
                name: l.name().to_string(),
                enabled: l.is_enabled(),
                clients: l.client_count(),
            })
            .collect();
        rate_limiters.sort_by(|a, b| a.name.cmp(&b.name));

        RegistryStats {
            breakers,
            pools,
            rate_limiters,
            shutting_down: self.shutdown.is_triggered(),
        }
    }

    /// Force the named breaker closed. Returns `false` if it does not exist.
    pub fn reset_breaker(&self, name: &str) -> bool {
        match self.breakers.get(name) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    /// Wrap `op` with the breaker registered under `name`.
    pub fn with_circuit_breaker<F, Fut, T, E>(
        &self,
        name: &str,
        op: F,
    ) -> impl Fn() -> BoxFuture<'static, Result<T, CallError<E>>> + Send + Sync + 'static
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, CallError<E>>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        compose::with_circuit_breaker(self.circuit_breaker(name), op)
    }

    /// Run `op` with the shared retry policy, stopping early on shutdown.
    pub async fn retry<F, Fut, T, E>(&self, op: F) -> Result<T, CallError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CallError<E>>>,
    {
        // subscribe before checking so a concurrent trigger is not missed
        let mut cancel = self.cancellation();
        if self.shutdown.is_triggered() {
            return Err(CallError::Cancelled);
        }
        self.retries.execute_until(op, &mut cancel).await
    }

    /// Receiver that fires when `shutdown` is called.
    pub fn cancellation(&self) -> broadcast::Receiver<()> {
        self.shutdown.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_triggered()
    }

    /// Drop closed breakers unused for `ttl` that nobody else holds, and rate
    /// limiter clients idle for `ttl`. Returns the number of breakers removed.
    pub fn evict_idle(&self, ttl: Duration) -> usize {
        let before = self.breakers.len();
        self.breakers.retain(|_, breaker| {
            let idle = breaker.state() == CircuitState::Closed
                && breaker.idle_for() >= ttl
                && Arc::strong_count(breaker) == 1;
            !idle
        });
        let evicted = before.saturating_sub(self.breakers.len());

        let clients: usize = self.limiters.iter().map(|l| l.evict_idle(ttl)).sum();
        if evicted > 0 || clients > 0 {
            tracing::debug!(breakers = evicted, clients, "Evicted idle registry state");
        }
        evicted
    }

    /// Signal cancellation and close every registered pool. Idempotent.
    pub fn shutdown(&self) {
        if self.shutdown.is_triggered() {
            return;
        }
        tracing::info!(pools = self.pools.len(), "Registry shutting down");
        self.shutdown.trigger();
        for pool in self.pools.iter() {
            pool.shutdown();
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(GuardConfig::default())
    }
}
