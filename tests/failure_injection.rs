//! Failure injection tests: flaky dependencies, open circuits, exhausted pools
//! and hostile input, driven through the public API.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use gatekeeper::config::loader::parse_config;
use gatekeeper::config::{BreakerConfig, PoolConfig};
use gatekeeper::resilience::{with_retry, CircuitState};
use gatekeeper::security::ValidationCategory;
use gatekeeper::{
    CallError, ConnectionPool, Disposition, GuardConfig, GuardError, PoolError, Registry,
    RetryExecutor, RetryPolicy,
};
use serde_json::json;

mod common;

use common::{DependencyError, FlakyDependency, MockManager};

fn registry(failure_threshold: u32, success_threshold: u32, timeout_ms: u64) -> Registry {
    let mut config = GuardConfig::default();
    config.circuit_breaker = BreakerConfig {
        failure_threshold,
        success_threshold,
        timeout_ms,
    };
    Registry::new(config)
}

#[tokio::test(start_paused = true)]
async fn test_flaky_dependency_recovers_inside_breaker() {
    let registry = registry(5, 2, 60_000);
    let dependency = Arc::new(FlakyDependency::new(3));
    let executor = Arc::new(RetryExecutor::with_seed(
        RetryPolicy::new(4, Duration::from_millis(100), Duration::from_secs(60)),
        7,
    ));

    let dep = dependency.clone();
    let guarded = registry.with_circuit_breaker(
        "inventory",
        with_retry(executor, move || {
            let dep = dep.clone();
            async move { dep.call().await }
        }),
    );

    assert_eq!(guarded().await.unwrap(), 4);
    assert_eq!(dependency.calls(), 4);

    let stats = registry.get_stats("inventory").unwrap();
    assert_eq!(stats.state, CircuitState::Closed);
    assert_eq!(stats.failure_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_open_circuit_fails_fast_then_recovers() {
    let registry = registry(2, 1, 1_000);
    let dependency = Arc::new(FlakyDependency::new(2));

    let dep = dependency.clone();
    let guarded = registry.with_circuit_breaker("search", move || {
        let dep = dep.clone();
        async move { dep.call().await }
    });

    for _ in 0..2 {
        assert!(matches!(
            guarded().await,
            Err(CallError::Retryable(DependencyError::Unavailable))
        ));
    }
    let breaker = registry.circuit_breaker("search");
    assert_eq!(breaker.state(), CircuitState::Open);

    let rejected = guarded().await.unwrap_err();
    assert!(rejected.is_circuit_open());
    assert_eq!(rejected.disposition(), Disposition::Unavailable);
    assert_eq!(dependency.calls(), 2);

    tokio::time::advance(Duration::from_secs(1)).await;
    assert_eq!(guarded().await.unwrap(), 3);
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.failure_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_retry_sequence() {
    let registry = Arc::new(Registry::default());
    let dependency = Arc::new(FlakyDependency::down());

    let task = {
        let registry = registry.clone();
        let dependency = dependency.clone();
        tokio::spawn(async move { registry.retry(|| dependency.call()).await })
    };

    tokio::time::sleep(Duration::from_millis(10)).await;
    registry.shutdown();

    let result = task.await.unwrap();
    assert!(matches!(result, Err(CallError::Cancelled)), "{result:?}");
    assert_eq!(dependency.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_pool_and_shutdown() {
    let registry = Registry::default();
    let pool = ConnectionPool::new(
        "warehouse",
        PoolConfig {
            min_size: 1,
            max_size: 2,
            acquire_timeout_ms: 1_000,
            max_idle_secs: 300,
            max_age_secs: 3_600,
        },
        MockManager::default(),
    );
    assert!(registry.register_pool(pool.clone()));
    assert!(!registry.register_pool(pool.clone()));

    let first = pool.get().await.unwrap();
    let _second = pool.get().await.unwrap();

    let err = pool.acquire(Duration::from_millis(100)).await.unwrap_err();
    assert!(matches!(err, PoolError::Timeout { .. }));
    assert_eq!(GuardError::from(err).disposition(), Disposition::Unavailable);

    registry.shutdown();
    assert!(registry.pool_stats("warehouse").unwrap().closed);
    assert!(matches!(
        pool.acquire(Duration::from_millis(100)).await,
        Err(PoolError::Closed { .. })
    ));

    // checked-out connections are destroyed, not recycled, once closed
    drop(first);
    assert_eq!(pool.stats().idle, 0);
    assert_eq!(pool.manager().destroyed.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_connect_does_not_leak_capacity() {
    let pool = ConnectionPool::new(
        "flaky-db",
        PoolConfig {
            min_size: 0,
            max_size: 1,
            ..PoolConfig::default()
        },
        MockManager::default(),
    );
    pool.manager().refuse.store(true, std::sync::atomic::Ordering::SeqCst);
    assert!(matches!(
        pool.acquire(Duration::from_millis(50)).await,
        Err(PoolError::Connect { .. })
    ));

    pool.manager().refuse.store(false, std::sync::atomic::Ordering::SeqCst);
    assert!(pool.acquire(Duration::from_millis(50)).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_hostile_requests_rejected() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("reports")).unwrap();
    fs::write(dir.path().join("reports/summary.csv"), "a,b\n").unwrap();

    let config = parse_config(&format!(
        r#"
        [rate_limit]
        burst_size = 100

        [path]
        project_root = "{}"

        [request]
        required_fields = ["tool"]
        "#,
        dir.path().display()
    ))
    .unwrap();
    let security = Registry::new(config).security_manager();

    let ok = security.validate_request(
        "agent-1",
        &json!({"tool": "report", "query": "SELECT * FROM games", "path": "reports/summary.csv"}),
    );
    assert!(ok.allowed, "{ok:?}");

    let cases = [
        (json!({"tool": "sql", "query": "DROP TABLE games"}), ValidationCategory::ForbiddenKeyword),
        (
            json!({"tool": "sql", "query": "SELECT * FROM games WHERE 1=1 OR 1=1"}),
            ValidationCategory::InjectionPattern,
        ),
        (json!({"tool": "fs", "path": "../../etc/passwd"}), ValidationCategory::PathPattern),
        (json!({"tool": "fs", "path": "~/.ssh/id_rsa"}), ValidationCategory::PathPattern),
        (
            json!({"tool": "fs", "path": "%2e%2e%2f%2e%2e%2fetc%2fpasswd"}),
            ValidationCategory::PathPattern,
        ),
        (json!({"query": "SELECT 1"}), ValidationCategory::Shape),
    ];
    for (payload, expected) in cases {
        let decision = security.validate_request("agent-1", &payload);
        assert!(!decision.allowed, "{payload}");
        assert_eq!(decision.category, Some(expected), "{payload}");
        assert!(decision.reason.is_some());
    }

    let report = security.get_client_stats("agent-1");
    assert_eq!(report.security.allowed, 1);
    assert_eq!(report.security.blocked, 6);
}
