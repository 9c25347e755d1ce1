//! Bounded connection pool.
//!
//! # Responsibilities
//! - Hand out validated connections, creating new ones up to `max_size`
//! - Suspend callers when the pool is exhausted, bounded by their timeout
//! - Evict idle and aged connections on the acquire path
//! - Destroy connections on release once the pool is shut down
//!
//! # Design Decisions
//! - A semaphore of `max_size` permits bounds checked-out connections; a
//!   cancelled waiter holds no permit, so nothing leaks
//! - Creation is reserved under the same lock that saw the idle list empty,
//!   which keeps `idle + active <= max_size`
//! - Idle reuse is LIFO so fewer connections stay warm
//! - The lock is never held across `.await` or host callbacks that may block

mod connection;
mod manager;

pub use connection::PooledConnection;
pub use manager::ConnectionManager;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::time::Instant;

use crate::config::PoolConfig;
use crate::observability::metrics;
use connection::IdleConnection;

/// Errors returned by [`ConnectionPool::acquire`].
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("timed out after {waited:?} waiting for a connection from pool '{pool}'")]
    Timeout { pool: String, waited: Duration },

    #[error("pool '{pool}' is shut down")]
    Closed { pool: String },

    #[error("failed to open connection for pool '{pool}': {source}")]
    Connect {
        pool: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Point-in-time view of a pool, for monitoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub name: String,
    pub max_size: usize,
    pub idle: usize,
    pub active: usize,
    pub total_created: u64,
    pub total_destroyed: u64,
    pub timeouts: u64,
    pub closed: bool,
}

/// Type-erased control surface, so pools of different connection types can
/// be registered side by side.
pub trait ManagedPool: Send + Sync {
    fn name(&self) -> &str;
    fn stats(&self) -> PoolStats;
    fn shutdown(&self);
}

struct PoolState<C> {
    idle: Vec<IdleConnection<C>>,
    /// idle + checked out + reserved for creation
    total: usize,
    closed: bool,
    created: u64,
    destroyed: u64,
    timeouts: u64,
}

enum Checkout<C> {
    Idle(IdleConnection<C>),
    Create,
}

/// Undoes a creation reservation if `connect` fails or the acquire is dropped.
struct Reservation<'a, C> {
    state: &'a Mutex<PoolState<C>>,
    armed: bool,
}

impl<C> Drop for Reservation<'_, C> {
    fn drop(&mut self) {
        if self.armed {
            self.state.lock().total -= 1;
        }
    }
}

/// Pool of reusable connections to one dependency.
pub struct ConnectionPool<M: ConnectionManager> {
    name: String,
    config: PoolConfig,
    manager: M,
    permits: Arc<Semaphore>,
    state: Mutex<PoolState<M::Connection>>,
    next_id: AtomicU64,
}

impl<M: ConnectionManager> ConnectionPool<M> {
    pub fn new(name: impl Into<String>, mut config: PoolConfig, manager: M) -> Arc<Self> {
        config.max_size = config.max_size.max(1);
        config.min_size = config.min_size.min(config.max_size);
        Arc::new(Self {
            name: name.into(),
            permits: Arc::new(Semaphore::new(config.max_size)),
            config,
            manager,
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                total: 0,
                closed: false,
                created: 0,
                destroyed: 0,
                timeouts: 0,
            }),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn manager(&self) -> &M {
        &self.manager
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Acquire with the configured default timeout.
    pub async fn get(self: &Arc<Self>) -> Result<PooledConnection<M>, PoolError> {
        self.acquire(self.config.acquire_timeout()).await
    }

    /// Check out a connection, waiting at most `timeout` for one to free up.
    pub async fn acquire(
        self: &Arc<Self>,
        timeout: Duration,
    ) -> Result<PooledConnection<M>, PoolError> {
        let started = Instant::now();
        if self.is_closed() {
            return Err(self.closed_error());
        }

        let permit = match tokio::time::timeout(timeout, self.permits.clone().acquire_owned()).await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(self.closed_error()),
            Err(_) => return Err(self.timeout_error(timeout)),
        };

        loop {
            let checkout = {
                let mut s = self.state.lock();
                if s.closed {
                    return Err(self.closed_error());
                }
                match s.idle.pop() {
                    Some(idle) => Checkout::Idle(idle),
                    None => {
                        s.total += 1;
                        Checkout::Create
                    }
                }
            };

            match checkout {
                Checkout::Idle(mut idle) => {
                    let now = Instant::now();
                    if let Some(reason) = self.expired(&idle, now) {
                        self.destroy(idle, reason);
                        continue;
                    }
                    if !self.manager.is_valid(&mut idle.conn) {
                        self.destroy(idle, "failed validation");
                        continue;
                    }
                    idle.last_used_at = now;
                    self.publish_gauges();
                    return Ok(PooledConnection::new(self.clone(), idle, permit));
                }
                Checkout::Create => {
                    let remaining = timeout.saturating_sub(started.elapsed());
                    let conn = self.create(remaining, timeout).await?;
                    self.publish_gauges();
                    return Ok(PooledConnection::new(self.clone(), conn, permit));
                }
            }
        }
    }

    /// Return a connection to the pool. Equivalent to dropping it.
    pub fn release(&self, conn: PooledConnection<M>) {
        drop(conn);
    }

    /// Open connections until `min_size` exist. Returns how many were created.
    pub async fn warm_up(&self) -> Result<usize, PoolError> {
        let mut created = 0;
        loop {
            // A creation holds a permit like any checkout; stop if the pool is busy.
            let Ok(permit) = self.permits.clone().try_acquire_owned() else {
                break;
            };
            {
                let mut s = self.state.lock();
                if s.closed || s.total >= self.config.min_size {
                    break;
                }
                s.total += 1;
            }
            let conn = self
                .create(self.config.acquire_timeout(), self.config.acquire_timeout())
                .await?;
            self.check_in(conn, false);
            drop(permit);
            created += 1;
        }
        if created > 0 {
            tracing::debug!(pool = %self.name, created, "Pool warmed up");
        }
        Ok(created)
    }

    /// Close the pool: destroy idle connections now, fail pending and future
    /// acquires, and destroy active connections when they are released.
    pub fn shutdown(&self) {
        let drained = {
            let mut s = self.state.lock();
            if s.closed {
                return;
            }
            s.closed = true;
            std::mem::take(&mut s.idle)
        };
        self.permits.close();

        let count = drained.len();
        for idle in drained {
            self.destroy(idle, "pool shutdown");
        }
        self.publish_gauges();
        tracing::info!(pool = %self.name, destroyed = count, "Connection pool shut down");
    }

    pub fn stats(&self) -> PoolStats {
        let s = self.state.lock();
        PoolStats {
            name: self.name.clone(),
            max_size: self.config.max_size,
            idle: s.idle.len(),
            active: s.total - s.idle.len(),
            total_created: s.created,
            total_destroyed: s.destroyed,
            timeouts: s.timeouts,
            closed: s.closed,
        }
    }

    /// Open a connection for a slot already reserved in `total`.
    async fn create(
        &self,
        remaining: Duration,
        timeout: Duration,
    ) -> Result<IdleConnection<M::Connection>, PoolError> {
        let mut reservation = Reservation {
            state: &self.state,
            armed: true,
        };

        let conn = match tokio::time::timeout(remaining, self.manager.connect()).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                tracing::warn!(pool = %self.name, error = %e, "Failed to open connection");
                return Err(PoolError::Connect {
                    pool: self.name.clone(),
                    source: Box::new(e),
                });
            }
            Err(_) => return Err(self.timeout_error(timeout)),
        };

        let now = Instant::now();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut s = self.state.lock();
            s.created += 1;
            if s.closed {
                drop(s);
                // The reservation guard gives the slot back.
                self.manager.destroy(conn);
                self.state.lock().destroyed += 1;
                return Err(self.closed_error());
            }
        }
        reservation.armed = false;

        tracing::debug!(pool = %self.name, id, "Opened new connection");
        Ok(IdleConnection {
            id,
            conn,
            created_at: now,
            last_used_at: now,
        })
    }

    /// Called from `PooledConnection::drop`.
    pub(crate) fn check_in(&self, mut idle: IdleConnection<M::Connection>, discard: bool) {
        let now = Instant::now();
        let reason = if discard {
            Some("discarded")
        } else if self.past_max_age(&idle, now) {
            Some("max age")
        } else if !self.manager.is_valid(&mut idle.conn) {
            Some("failed validation")
        } else {
            None
        };

        if let Some(reason) = reason {
            self.destroy(idle, reason);
        } else {
            let rejected = {
                let mut s = self.state.lock();
                if s.closed {
                    Some(idle)
                } else {
                    idle.last_used_at = now;
                    s.idle.push(idle);
                    None
                }
            };
            if let Some(idle) = rejected {
                self.destroy(idle, "pool closed");
            }
        }
        self.publish_gauges();
    }

    fn expired(&self, idle: &IdleConnection<M::Connection>, now: Instant) -> Option<&'static str> {
        if self.past_max_age(idle, now) {
            return Some("max age");
        }
        let max_idle = self.config.max_idle();
        if !max_idle.is_zero() && now.saturating_duration_since(idle.last_used_at) >= max_idle {
            return Some("idle timeout");
        }
        None
    }

    fn past_max_age(&self, idle: &IdleConnection<M::Connection>, now: Instant) -> bool {
        let max_age = self.config.max_age();
        !max_age.is_zero() && now.saturating_duration_since(idle.created_at) >= max_age
    }

    fn destroy(&self, idle: IdleConnection<M::Connection>, reason: &'static str) {
        {
            let mut s = self.state.lock();
            s.total -= 1;
            s.destroyed += 1;
        }
        tracing::debug!(pool = %self.name, id = idle.id, reason, "Destroying connection");
        self.manager.destroy(idle.conn);
    }

    fn closed_error(&self) -> PoolError {
        PoolError::Closed {
            pool: self.name.clone(),
        }
    }

    fn timeout_error(&self, waited: Duration) -> PoolError {
        self.state.lock().timeouts += 1;
        metrics::record_pool_timeout(&self.name);
        tracing::warn!(pool = %self.name, waited_ms = waited.as_millis() as u64, "Timed out waiting for connection");
        PoolError::Timeout {
            pool: self.name.clone(),
            waited,
        }
    }

    fn publish_gauges(&self) {
        let (idle, active) = {
            let s = self.state.lock();
            (s.idle.len(), s.total - s.idle.len())
        };
        metrics::set_pool_connections(&self.name, idle, active);
    }
}

impl<M: ConnectionManager> ManagedPool for ConnectionPool<M> {
    fn name(&self) -> &str {
        &self.name
    }

    fn stats(&self) -> PoolStats {
        ConnectionPool::stats(self)
    }

    fn shutdown(&self) {
        ConnectionPool::shutdown(self)
    }
}
