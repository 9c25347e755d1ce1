//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the guard layer.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for resilience and request security.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GuardConfig {
    /// Circuit breaker defaults for named dependencies.
    pub circuit_breaker: BreakerConfig,

    /// Retry policy defaults.
    pub retries: RetryConfig,

    /// Connection pool defaults.
    pub pool: PoolConfig,

    /// Per-client rate limiting.
    pub rate_limit: RateLimitConfig,

    /// SQL query validation.
    pub sql: SqlConfig,

    /// File path validation.
    pub path: PathConfig,

    /// Request shape and size limits.
    pub request: RequestConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,

    /// Consecutive half-open successes before the circuit closes.
    pub success_threshold: u32,

    /// Time the circuit stays open before admitting a trial call, in milliseconds.
    pub timeout_ms: u64,
}

impl BreakerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout_ms: 60_000,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,

    /// Lower bound of the jitter multiplier.
    pub jitter_min: f64,

    /// Upper bound of the jitter multiplier.
    pub jitter_max: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            jitter_min: 0.5,
            jitter_max: 1.5,
        }
    }
}

/// Connection pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Connections created by `warm_up`.
    pub min_size: usize,

    /// Hard cap on idle + active connections.
    pub max_size: usize,

    /// Default acquire timeout in milliseconds.
    pub acquire_timeout_ms: u64,

    /// Idle connections older than this are evicted on acquire.
    pub max_idle_secs: u64,

    /// Connections older than this are never handed out again.
    pub max_age_secs: u64,
}

impl PoolConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn max_idle(&self) -> Duration {
        Duration::from_secs(self.max_idle_secs)
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 1,
            max_size: 10,
            acquire_timeout_ms: 30_000,
            max_idle_secs: 300,
            max_age_secs: 3_600,
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting. When disabled every request is allowed.
    pub enabled: bool,

    /// Token refill rate (tokens per second).
    pub requests_per_second: f64,

    /// Burst capacity (bucket size).
    pub burst_size: u32,

    /// Rolling per-minute cap.
    pub requests_per_minute: u32,

    /// Rolling per-hour cap.
    pub requests_per_hour: u32,

    /// Clients not seen for this long may be evicted.
    pub client_idle_secs: u64,
}

impl RateLimitConfig {
    pub fn client_idle(&self) -> Duration {
        Duration::from_secs(self.client_idle_secs)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_second: 1.0,
            burst_size: 10,
            requests_per_minute: 60,
            requests_per_hour: 1_000,
            client_idle_secs: 3_600,
        }
    }
}

/// SQL validation configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SqlConfig {
    /// Keywords a query may start with.
    pub allowed_keywords: Vec<String>,

    /// Keywords rejected anywhere as whole tokens.
    pub forbidden_keywords: Vec<String>,

    /// Maximum query length in bytes.
    pub max_query_length: usize,
}

impl Default for SqlConfig {
    fn default() -> Self {
        Self {
            allowed_keywords: ["SELECT", "EXPLAIN", "SHOW", "WITH", "DESCRIBE"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            forbidden_keywords: [
                "DROP", "DELETE", "UPDATE", "INSERT", "ALTER", "TRUNCATE", "GRANT", "REVOKE",
                "CREATE", "REPLACE", "MERGE", "EXEC",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            max_query_length: 10_000,
        }
    }
}

/// File path validation configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PathConfig {
    /// Every accepted path must resolve strictly inside this directory.
    pub project_root: PathBuf,

    /// Allowed file extensions (without dot). Empty allows any.
    pub allowed_extensions: Vec<String>,

    /// File or directory names that are never served.
    pub sensitive_names: Vec<String>,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            project_root: PathBuf::from("."),
            allowed_extensions: Vec::new(),
            sensitive_names: [
                ".env", ".ssh", ".git", ".aws", "id_rsa", "id_ed25519", "passwd", "shadow",
                "credentials", ".htpasswd", ".pgpass", ".netrc",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// Request shape and size configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RequestConfig {
    /// Maximum serialized payload size in bytes.
    pub max_request_bytes: usize,

    /// Maximum length of any string field.
    pub max_string_length: usize,

    /// Maximum nesting depth of objects and arrays.
    pub max_depth: usize,

    /// Parameters every request must carry.
    pub required_fields: Vec<String>,

    /// Fields holding SQL queries.
    pub sql_fields: Vec<String>,

    /// Fields holding file paths.
    pub path_fields: Vec<String>,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            max_request_bytes: 1024 * 1024,
            max_string_length: 10_000,
            max_depth: 32,
            required_fields: Vec::new(),
            sql_fields: vec!["query".to_string(), "sql".to_string()],
            path_fields: vec![
                "path".to_string(),
                "file_path".to_string(),
                "output_path".to_string(),
            ],
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON log lines instead of human-readable output.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}
