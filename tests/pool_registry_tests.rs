mod common;

use agencydb::ErrorKind;
use agencydb::pool::PoolRegistry;
use common::{FakeDb, Fault, settle, tenant};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

#[tokio::test(start_paused = true)]
async fn concurrent_first_use_builds_one_pool() {
    let db = FakeDb::new();
    db.state().connect_delay = Some(Duration::from_millis(50));
    let registry = PoolRegistry::new(db.connector());
    let t = tenant("agency_acme_001");

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let registry = registry.clone();
            let t = t.clone();
            tokio::spawn(async move { registry.get_pool(&t).await.unwrap() })
        })
        .collect();

    let mut pools = Vec::new();
    for handle in handles {
        pools.push(handle.await.unwrap());
    }

    assert_eq!(db.state().connects, 1);
    assert!(pools.iter().all(|p| Arc::ptr_eq(p, &pools[0])));
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn tenants_get_separate_pools() {
    let db = FakeDb::new();
    let registry = PoolRegistry::new(db.connector());

    let a = registry.get_pool(&tenant("agency_a")).await.unwrap();
    let b = registry.get_pool(&tenant("agency_b")).await.unwrap();

    assert!(!Arc::ptr_eq(&a, &b));
    assert_eq!(a.tenant().as_str(), "agency_a");

    let stats = registry.stats();
    let names: Vec<_> = stats.iter().map(|s| s.tenant.as_str()).collect();
    assert_eq!(names, vec!["agency_a", "agency_b"]);
}

#[tokio::test]
async fn evict_closes_and_next_use_recreates() {
    let db = FakeDb::new();
    let registry = PoolRegistry::new(db.connector());
    let t = tenant("agency_acme_001");

    let first = registry.get_pool(&t).await.unwrap();
    registry.evict(&t).await;
    settle().await;

    assert!(first.pool().is_closed());
    assert!(!registry.contains(&t));
    assert_eq!(db.state().closes, 1);

    let second = registry.get_pool(&t).await.unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(db.state().connects, 2);

    // Evicting an absent tenant is a no-op.
    registry.evict(&tenant("agency_unknown")).await;
    settle().await;
    assert_eq!(db.state().closes, 1);
}

#[tokio::test(start_paused = true)]
async fn evict_does_not_wait_for_the_pool_to_drain() {
    let db = FakeDb::new();
    let gate = Arc::new(Notify::new());
    db.state().close_gate = Some(gate.clone());
    let registry = PoolRegistry::new(db.connector());
    let t = tenant("agency_acme_001");

    let first = registry.get_pool(&t).await.unwrap();
    tokio::time::timeout(Duration::from_millis(10), registry.evict(&t))
        .await
        .expect("evict returned while the close was still draining");

    assert!(!registry.contains(&t));
    settle().await;
    assert!(!first.pool().is_closed());
    assert_eq!(db.state().closes, 0);

    // A replacement is available before the old pool finished closing.
    let second = registry.get_pool(&t).await.unwrap();
    assert!(!Arc::ptr_eq(&first, &second));

    gate.notify_one();
    settle().await;
    assert!(first.pool().is_closed());
    assert!(!second.pool().is_closed());
    assert_eq!(db.state().closes, 1);
}

#[tokio::test]
async fn stale_handle_does_not_evict_replacement() {
    let db = FakeDb::new();
    let registry = PoolRegistry::new(db.connector());
    let t = tenant("agency_acme_001");

    let stale = registry.get_pool(&t).await.unwrap();
    registry.evict(&t).await;
    let fresh = registry.get_pool(&t).await.unwrap();

    registry.evict_if_current(&t, &stale).await;
    settle().await;

    assert!(registry.contains(&t));
    assert!(!fresh.pool().is_closed());
    assert_eq!(db.state().closes, 1);
}

#[tokio::test]
async fn current_handle_is_evicted_once() {
    let db = FakeDb::new();
    let registry = PoolRegistry::new(db.connector());
    let t = tenant("agency_acme_001");

    let pooled = registry.get_pool(&t).await.unwrap();
    tokio::join!(
        registry.evict_if_current(&t, &pooled),
        registry.evict_if_current(&t, &pooled)
    );
    settle().await;

    assert!(!registry.contains(&t));
    assert!(pooled.pool().is_closed());
    assert_eq!(db.state().closes, 1);
}

#[tokio::test]
async fn construction_errors_propagate_and_are_not_cached() {
    let db = FakeDb::new();
    db.state().connect_fault = Some(Fault::connectivity());
    let registry = PoolRegistry::new(db.connector());
    let t = tenant("agency_acme_001");

    let err = match registry.get_pool(&t).await {
        Ok(_) => panic!("expected pool construction to fail"),
        Err(e) => e,
    };
    assert!(matches!(err, agencydb::AgencyDbError::PoolInit { .. }));
    assert_eq!(err.kind(), ErrorKind::Connectivity);

    db.state().connect_fault = None;
    assert!(registry.get_pool(&t).await.is_ok());
    assert_eq!(db.state().connects, 2);
}

#[tokio::test]
async fn idle_pools_are_dropped_when_enabled() {
    let db = FakeDb::new();
    let registry =
        PoolRegistry::with_idle_eviction(db.connector(), Some(Duration::from_millis(100)));
    let t = tenant("agency_acme_001");

    registry.get_pool(&t).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(!registry.contains(&t));
    registry.get_pool(&t).await.unwrap();
    assert_eq!(db.state().connects, 2);
}

#[tokio::test]
async fn shutdown_closes_every_pool() {
    let db = FakeDb::new();
    let registry = PoolRegistry::new(db.connector());

    for name in ["agency_a", "agency_b", "agency_c"] {
        registry.get_pool(&tenant(name)).await.unwrap();
    }
    registry.shutdown().await;

    assert_eq!(db.state().closes, 3);
    assert!(registry.is_empty());
}
