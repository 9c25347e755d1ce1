//! Shared utilities for integration and load testing.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use gatekeeper::CallError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DependencyError {
    #[error("dependency unavailable")]
    Unavailable,
    #[error("bad input")]
    BadInput,
}

/// A dependency that fails a fixed number of times, then succeeds.
pub struct FlakyDependency {
    failures_left: AtomicU32,
    calls: AtomicU32,
    latency: Duration,
}

impl FlakyDependency {
    pub fn new(failures: u32) -> Self {
        Self::with_latency(failures, Duration::ZERO)
    }

    pub fn with_latency(failures: u32, latency: Duration) -> Self {
        Self {
            failures_left: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
            latency,
        }
    }

    /// Never succeeds.
    pub fn down() -> Self {
        Self::new(u32::MAX)
    }

    pub async fn call(&self) -> Result<u32, CallError<DependencyError>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            Err(CallError::Retryable(DependencyError::Unavailable))
        } else {
            Ok(n)
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Error)]
#[error("connection refused")]
pub struct Refused;

pub struct MockConnection {
    pub healthy: bool,
}

/// Connection manager that tracks how many connections are alive at once.
#[derive(Default)]
pub struct MockManager {
    pub opened: AtomicUsize,
    pub destroyed: AtomicUsize,
    pub live: AtomicUsize,
    pub peak_live: AtomicUsize,
    pub refuse: AtomicBool,
}

impl MockManager {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn peak_live(&self) -> usize {
        self.peak_live.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl gatekeeper::ConnectionManager for MockManager {
    type Connection = MockConnection;
    type Error = Refused;

    async fn connect(&self) -> Result<MockConnection, Refused> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(Refused);
        }
        tokio::task::yield_now().await;
        self.opened.fetch_add(1, Ordering::SeqCst);
        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_live.fetch_max(live, Ordering::SeqCst);
        Ok(MockConnection { healthy: true })
    }

    fn is_valid(&self, conn: &mut MockConnection) -> bool {
        conn.healthy
    }

    fn destroy(&self, _conn: MockConnection) {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}
