//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GuardConfig (validated, immutable)
//!     → handed to Registry / SecurityManager at startup
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use schema::BreakerConfig;
pub use schema::GuardConfig;
pub use schema::ObservabilityConfig;
pub use schema::PathConfig;
pub use schema::PoolConfig;
pub use schema::RateLimitConfig;
pub use schema::RequestConfig;
pub use schema::RetryConfig;
pub use schema::SqlConfig;
