//! Security decision counters, per client and per category.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;

use crate::security::rules::ValidationCategory;

#[derive(Debug, Clone)]
struct ClientCounters {
    allowed: u64,
    blocked: HashMap<ValidationCategory, u64>,
    last_seen: Instant,
}

impl Default for ClientCounters {
    fn default() -> Self {
        Self {
            allowed: 0,
            blocked: HashMap::new(),
            last_seen: Instant::now(),
        }
    }
}

/// Serializable view of one client's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClientSecurityStats {
    pub allowed: u64,
    pub blocked: u64,
    pub blocked_by_category: HashMap<ValidationCategory, u64>,
}

/// Serializable view of all counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SecuritySummary {
    pub allowed: u64,
    pub blocked: u64,
    pub blocked_by_category: HashMap<ValidationCategory, u64>,
    pub clients: usize,
}

#[derive(Debug, Default)]
pub struct SecurityStats {
    clients: DashMap<String, ClientCounters>,
    categories: DashMap<ValidationCategory, u64>,
    allowed: AtomicU64,
    blocked: AtomicU64,
}

impl SecurityStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_allowed(&self, client_id: &str) {
        self.allowed.fetch_add(1, Ordering::Relaxed);
        let mut counters = self.clients.entry(client_id.to_string()).or_default();
        counters.allowed += 1;
        counters.last_seen = Instant::now();
    }

    pub fn record_blocked(&self, client_id: &str, category: ValidationCategory) {
        self.blocked.fetch_add(1, Ordering::Relaxed);
        *self.categories.entry(category).or_default() += 1;
        let mut counters = self.clients.entry(client_id.to_string()).or_default();
        *counters.blocked.entry(category).or_default() += 1;
        counters.last_seen = Instant::now();
    }

    /// Forget per-client counters not updated within `ttl`. Totals are kept.
    pub fn evict_idle(&self, ttl: Duration) -> usize {
        let now = Instant::now();
        let before = self.clients.len();
        self.clients
            .retain(|_, c| now.saturating_duration_since(c.last_seen) < ttl);
        before.saturating_sub(self.clients.len())
    }

    pub fn client(&self, client_id: &str) -> ClientSecurityStats {
        self.clients
            .get(client_id)
            .map(|c| ClientSecurityStats {
                allowed: c.allowed,
                blocked: c.blocked.values().sum(),
                blocked_by_category: c.blocked.clone(),
            })
            .unwrap_or_default()
    }

    pub fn summary(&self) -> SecuritySummary {
        SecuritySummary {
            allowed: self.allowed.load(Ordering::Relaxed),
            blocked: self.blocked.load(Ordering::Relaxed),
            blocked_by_category: self
                .categories
                .iter()
                .map(|entry| (*entry.key(), *entry.value()))
                .collect(),
            clients: self.clients.len(),
        }
    }
}
