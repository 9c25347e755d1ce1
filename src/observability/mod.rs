//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → Log aggregation (stdout, file, remote)
//!     → Host-installed metrics exporter
//!     → Stats snapshots (Registry::get_stats, SecurityManager::get_client_stats)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Metrics are cheap (atomic increments)
//! - Snapshots never expose internal counters to untrusted callers by themselves

pub mod logging;
pub mod metrics;
