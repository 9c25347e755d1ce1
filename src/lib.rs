//! Resilience and security guards for tool-serving services.
//!
//! # Architecture Overview
//!
//! ```text
//!     inbound request
//!          │
//!          ▼
//!   ┌────────────────────┐   rate limit → envelope → SQL → paths
//!   │  SecurityManager   │──────────────────────────────────────▶ reject (reason, category)
//!   └─────────┬──────────┘
//!             │ allowed
//!             ▼
//!   ┌────────────────────┐   named breakers, limiters, pools
//!   │      Registry      │
//!   └─────────┬──────────┘
//!             ▼
//!   CircuitBreaker ─▶ RetryExecutor ─▶ dependency call
//!                                       (optionally via ConnectionPool)
//! ```
//!
//! # Subsystems
//! - `config`: TOML configuration with defaults and semantic validation
//! - `resilience`: circuit breaker, retry with jittered backoff, composition
//! - `pool`: bounded connection pool over a host-supplied `ConnectionManager`
//! - `security`: validators, per-client rate limiting, decision stats
//! - `registry`: get-or-create lookup of named shared resources
//! - `lifecycle`: shutdown signal that cancels in-flight retries
//! - `observability`: tracing setup and metric recording

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod observability;
pub mod pool;
pub mod registry;
pub mod resilience;
pub mod security;

pub use config::schema::GuardConfig;
pub use error::{Disposition, GuardError};
pub use lifecycle::Shutdown;
pub use pool::{ConnectionManager, ConnectionPool, PoolError, PooledConnection};
pub use registry::Registry;
pub use resilience::{CallError, CircuitBreaker, RetryExecutor, RetryPolicy};
pub use security::{SecurityDecision, SecurityManager};
