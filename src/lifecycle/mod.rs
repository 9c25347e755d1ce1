//! Lifecycle management.
//!
//! # Shutdown Sequence
//! ```text
//! Registry::shutdown
//!     → shutdown.rs broadcasts the signal
//!     → retry sequences running under `execute_until` stop with `Cancelled`
//!     → registered pools drain idle connections and refuse new acquires
//!     → active connections are destroyed when released
//! ```

pub mod shutdown;

pub use shutdown::Shutdown;
