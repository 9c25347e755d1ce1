//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → rate_limit.rs (per-client burst, minute and hour caps)
//!     → limits.rs (payload size, shape, string length, depth)
//!     → sql.rs (query fields)
//!     → path.rs (file path fields)
//!     → manager.rs (decision + stats.rs counters)
//! ```
//!
//! # Design Decisions
//! - Defense in depth: multiple layers of protection
//! - Fail closed: reject on any security check failure
//! - No trust in client input

pub mod limits;
pub mod manager;
pub mod path;
pub mod rate_limit;
pub mod rules;
pub mod sql;
pub mod stats;

pub use limits::RequestValidator;
pub use manager::{ClientReport, SecurityDecision, SecurityManager};
pub use path::PathValidator;
pub use rate_limit::{ClientRateStats, RateLimitExceeded, RateLimitKind, RateLimiter};
pub use rules::{Severity, ValidationCategory, ValidationError};
pub use sql::{sanitize_identifier, SqlValidator};
pub use stats::SecurityStats;
