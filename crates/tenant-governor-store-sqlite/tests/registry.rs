// crates/tenant-governor-store-sqlite/tests/registry.rs
// ============================================================================
// Module: SQLite Pool Registry Tests
// Description: Per-path pool caching, concurrent first use, and shutdown.
// Purpose: Validate that one database path never gets two pools.
// ============================================================================

//! Integration tests for [`PoolRegistry`].

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use tempfile::TempDir;
use tenant_governor_store_sqlite::PoolError;
use tenant_governor_store_sqlite::PoolRegistry;
use tenant_governor_store_sqlite::PoolSettings;

fn registry() -> PoolRegistry {
    PoolRegistry::new(PoolSettings {
        acquire_timeout: Duration::from_millis(500),
        retry_interval: Duration::from_millis(20),
        ..PoolSettings::default()
    })
}

#[tokio::test]
async fn same_path_returns_cached_pool() {
    let temp = TempDir::new().unwrap();
    let registry = registry();
    let path = temp.path().join("economy.db");

    let first = registry.get_pool(&path, 8).await.unwrap();
    let second = registry.get_pool(&path, 2).await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(second.config().settings.max_connections, 8);
    assert_eq!(registry.len().await, 1);

    let other = registry.get_pool(temp.path().join("transport.db"), 4).await.unwrap();
    assert!(!Arc::ptr_eq(&first, &other));
    assert_eq!(registry.len().await, 2);
    registry.close_all().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_use_creates_one_pool() {
    let temp = TempDir::new().unwrap();
    let registry = Arc::new(registry());
    let path = temp.path().join("shared.db");

    let tasks: Vec<_> = (0 .. 8)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let path = path.clone();
            tokio::spawn(async move { registry.get_pool(&path, 8).await.unwrap() })
        })
        .collect();
    let mut pools = Vec::new();
    for task in tasks {
        pools.push(task.await.unwrap());
    }

    assert!(pools.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
    assert_eq!(registry.len().await, 1);
    assert_eq!(pools[0].stats().total_created, 2);
    registry.close_all().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cached_lookup_is_not_blocked_by_slow_open_of_other_path() {
    let temp = TempDir::new().unwrap();
    let registry = Arc::new(PoolRegistry::new(PoolSettings {
        busy_timeout_ms: 2_000,
        ..registry().defaults().clone()
    }));
    let economy = temp.path().join("economy.db");
    let transport = temp.path().join("transport.db");
    let cached = registry.get_pool(&economy, 8).await.unwrap();

    let locker = rusqlite::Connection::open(&transport).unwrap();
    locker.execute_batch("CREATE TABLE held (x INTEGER); BEGIN EXCLUSIVE;").unwrap();
    let stalled = {
        let registry = Arc::clone(&registry);
        let transport = transport.clone();
        tokio::spawn(async move { registry.get_pool(&transport, 4).await.is_ok() })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!stalled.is_finished());

    let started = Instant::now();
    let again = registry.get_pool(&economy, 8).await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(500));
    assert!(Arc::ptr_eq(&cached, &again));
    assert_eq!(registry.all_stats().await.len(), 1);

    drop(locker);
    let _ = stalled.await.unwrap();
    registry.close_all().await;
}

#[tokio::test]
async fn all_stats_are_keyed_by_path() {
    let temp = TempDir::new().unwrap();
    let registry = registry();
    let economy = temp.path().join("economy.db");
    let transport = temp.path().join("transport.db");

    let pool = registry.get_pool(&economy, 4).await.unwrap();
    registry.get_pool(&transport, 8).await.unwrap();
    let held = pool.acquire().await.unwrap();

    let stats = registry.all_stats().await;
    assert_eq!(stats.len(), 2);
    assert_eq!(stats[&economy].active, 1);
    assert_eq!(stats[&economy].max_connections, 4);
    assert_eq!(stats[&transport].warm_floor, 2);
    assert_eq!(stats[&transport].available, 2);

    drop(held);
    registry.close_all().await;
}

#[tokio::test]
async fn close_all_closes_and_empties() {
    let temp = TempDir::new().unwrap();
    let registry = registry();
    let pool = registry.get_pool(temp.path().join("economy.db"), 4).await.unwrap();

    registry.close_all().await;
    assert!(registry.is_empty().await);
    assert!(pool.is_closed());
    assert_eq!(pool.acquire().await.unwrap_err(), PoolError::Closed);
    registry.close_all().await;
}

#[tokio::test]
async fn invalid_ceiling_is_rejected_and_not_cached() {
    let temp = TempDir::new().unwrap();
    let registry = registry();
    let path = temp.path().join("economy.db");

    let err = registry.get_pool(&path, 0).await.unwrap_err();
    assert!(matches!(err, PoolError::Invalid(_)));
    assert!(registry.is_empty().await);
    assert!(registry.get_pool(&path, 2).await.is_ok());
    registry.close_all().await;
}
