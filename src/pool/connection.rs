//! Pooled connection handles.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use tokio::sync::OwnedSemaphorePermit;
use tokio::time::Instant;

use super::manager::ConnectionManager;
use super::ConnectionPool;

/// A connection plus its bookkeeping, as stored in the idle list.
pub(crate) struct IdleConnection<C> {
    pub(crate) id: u64,
    pub(crate) conn: C,
    pub(crate) created_at: Instant,
    pub(crate) last_used_at: Instant,
}

/// A RAII guard over a checked-out connection.
///
/// Dropping the guard releases the connection back to its pool, which either
/// recycles it into the idle list or destroys it.
pub struct PooledConnection<M: ConnectionManager> {
    pool: Arc<ConnectionPool<M>>,
    conn: Option<IdleConnection<M::Connection>>,
    discard: bool,
    // Released after `drop` has checked the connection in.
    _permit: OwnedSemaphorePermit,
}

impl<M: ConnectionManager> PooledConnection<M> {
    pub(crate) fn new(
        pool: Arc<ConnectionPool<M>>,
        conn: IdleConnection<M::Connection>,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        Self {
            pool,
            conn: Some(conn),
            discard: false,
            _permit: permit,
        }
    }

    pub fn id(&self) -> u64 {
        self.entry().id
    }

    pub fn created_at(&self) -> Instant {
        self.entry().created_at
    }

    pub fn pool_name(&self) -> &str {
        self.pool.name()
    }

    /// Destroy this connection on release instead of recycling it.
    pub fn discard(mut self) {
        self.discard = true;
    }

    fn entry(&self) -> &IdleConnection<M::Connection> {
        match &self.conn {
            Some(entry) => entry,
            None => unreachable!("connection taken before drop"),
        }
    }

    fn entry_mut(&mut self) -> &mut IdleConnection<M::Connection> {
        match &mut self.conn {
            Some(entry) => entry,
            None => unreachable!("connection taken before drop"),
        }
    }
}

impl<M: ConnectionManager> Deref for PooledConnection<M> {
    type Target = M::Connection;

    fn deref(&self) -> &Self::Target {
        &self.entry().conn
    }
}

impl<M: ConnectionManager> DerefMut for PooledConnection<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.entry_mut().conn
    }
}

impl<M: ConnectionManager> Drop for PooledConnection<M> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.check_in(conn, self.discard);
        }
    }
}

impl<M: ConnectionManager> fmt::Debug for PooledConnection<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("pool", &self.pool.name())
            .field("id", &self.conn.as_ref().map(|c| c.id))
            .finish()
    }
}
