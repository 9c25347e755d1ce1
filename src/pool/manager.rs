//! Connection lifecycle callbacks supplied by the host.

use async_trait::async_trait;

/// Factory, validator and destructor for one kind of pooled resource.
///
/// `is_valid` and `destroy` are synchronous because they run when a
/// [`PooledConnection`](super::PooledConnection) is dropped.
#[async_trait]
pub trait ConnectionManager: Send + Sync + 'static {
    type Connection: Send + 'static;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Open a new connection.
    async fn connect(&self) -> Result<Self::Connection, Self::Error>;

    /// Cheap liveness check run on checkout and check-in.
    fn is_valid(&self, _conn: &mut Self::Connection) -> bool {
        true
    }

    /// Close a connection that is leaving the pool for good.
    fn destroy(&self, conn: Self::Connection) {
        drop(conn);
    }
}
