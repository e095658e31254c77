//! End-to-end scenarios exercising the cache coordinator and lock service
//! together against an in-memory remote store.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use coordkit::cache::CacheCoordinator;
use coordkit::config::{CoordConfig, RegionConfig, RegionRegistry};
use coordkit::fencing::FencingToken;
use coordkit::lock::{LockService, ScopedLock};

use common::InMemoryKv;

fn regions_with(cfg: RegionConfig) -> Arc<RegionRegistry> {
    let regions = Arc::new(RegionRegistry::new());
    regions.register(cfg);
    regions
}

async fn coordinator(regions: Arc<RegionRegistry>, kv: Arc<InMemoryKv>) -> Arc<CacheCoordinator> {
    CacheCoordinator::new(&CoordConfig::default(), kv, regions)
        .await
        .expect("coordinator construction")
}

#[tokio::test]
async fn s1_thundering_herd_same_key_runs_loader_once() {
    let regions = regions_with(
        RegionConfig::builder("products")
            .l1(true, Duration::from_secs(60), 1_000)
            .l2(true, Duration::from_secs(60))
            .build(),
    );
    let cache = coordinator(regions, InMemoryKv::new()).await;
    let invocations = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..10 {
        let cache = cache.clone();
        let invocations = invocations.clone();
        handles.push(tokio::spawn(async move {
            cache
                .get_or_load("products", "p1", move || {
                    let invocations = invocations.clone();
                    async move {
                        invocations.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(Some("v".to_string()))
                    }
                })
                .await
        }));
    }

    for handle in handles {
        let result: Option<String> = handle.await.unwrap().unwrap();
        assert_eq!(result.as_deref(), Some("v"));
    }

    assert_eq!(invocations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn s2_thundering_herd_different_keys_runs_loader_per_key() {
    let regions = regions_with(
        RegionConfig::builder("products")
            .l1(true, Duration::from_secs(60), 1_000)
            .l2(true, Duration::from_secs(60))
            .build(),
    );
    let cache = coordinator(regions, InMemoryKv::new()).await;
    let invocations = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for i in 0..10 {
        let cache = cache.clone();
        let invocations = invocations.clone();
        let key = format!("p{i}");
        handles.push(tokio::spawn(async move {
            cache
                .get_or_load("products", &key, move || {
                    let invocations = invocations.clone();
                    async move {
                        invocations.fetch_add(1, Ordering::SeqCst);
                        Ok(Some("v".to_string()))
                    }
                })
                .await
        }));
    }

    for handle in handles {
        let result: Option<String> = handle.await.unwrap().unwrap();
        assert_eq!(result.as_deref(), Some("v"));
    }

    assert_eq!(invocations.load(Ordering::SeqCst), 10);
}

#[tokio::test]
async fn s3_null_sentinel_is_cached_after_one_loader_call() {
    let regions = regions_with(
        RegionConfig::builder("lookups")
            .l1(true, Duration::from_secs(60), 1_000)
            .l2(true, Duration::from_secs(60))
            .cache_nulls(Duration::from_secs(60))
            .build(),
    );
    let cache = coordinator(regions, InMemoryKv::new()).await;
    let invocations = Arc::new(AtomicUsize::new(0));

    let load = |invocations: Arc<AtomicUsize>| async move {
        invocations.fetch_add(1, Ordering::SeqCst);
        Ok(None::<String>)
    };

    let first = cache.get_or_load("lookups", "k", { let i = invocations.clone(); move || load(i) }).await.unwrap();
    let second = cache.get_or_load("lookups", "k", { let i = invocations.clone(); move || load(i) }).await.unwrap();

    assert_eq!(first, None);
    assert_eq!(second, None);
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn s4_fenced_write_rejects_a_stale_token() {
    let regions = regions_with(
        RegionConfig::builder("accounts")
            .l1(true, Duration::from_secs(60), 1_000)
            .l2(true, Duration::from_secs(60))
            .fenced(true)
            .build(),
    );
    let cache = coordinator(regions, InMemoryKv::new()).await;

    let accepted = cache
        .put_fenced("accounts", "a1", &"new".to_string(), FencingToken(10))
        .await
        .unwrap();
    assert!(accepted);

    let rejected = cache
        .put_fenced("accounts", "a1", &"stale".to_string(), FencingToken(5))
        .await
        .unwrap();
    assert!(!rejected);

    let current: Option<String> = cache.get("accounts", "a1").await.unwrap();
    assert_eq!(current.as_deref(), Some("new"));
}

#[tokio::test]
async fn s5_lock_mutual_exclusion_and_handoff() {
    let kv = InMemoryKv::new();
    let a = LockService::new(kv.clone(), uuid::Uuid::new_v4());
    let b = LockService::new(kv.clone(), uuid::Uuid::new_v4());
    let c = LockService::new(kv, uuid::Uuid::new_v4());

    let handle_a = a.try_acquire("daily-report", Duration::from_secs(60)).await.unwrap();
    let handle_b = b.try_acquire("daily-report", Duration::from_secs(60)).await.unwrap();

    assert!(handle_a.is_some());
    assert!(handle_b.is_none());

    a.release(&handle_a.unwrap()).await.unwrap();

    let handle_c = c.try_acquire("daily-report", Duration::from_secs(60)).await.unwrap();
    assert!(handle_c.is_some());
}

#[tokio::test]
async fn s6_scoped_lock_holds_minimum_duration_even_on_panic() {
    let kv = InMemoryKv::new();
    let service = LockService::new(kv, uuid::Uuid::new_v4());
    let scoped = ScopedLock::new(&service);

    let started = Instant::now();
    let outcome = std::panic::AssertUnwindSafe(scoped.run(
        "overnight-job",
        Duration::from_secs(60),
        Duration::from_secs(2),
        || async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            panic!("loader blew up");
        },
    ))
    .catch_unwind()
    .await;

    assert!(outcome.is_err(), "the panic must still resume after cleanup");
    assert!(started.elapsed() >= Duration::from_secs(2));

    assert!(
        service
            .try_acquire("overnight-job", Duration::from_secs(60))
            .await
            .unwrap()
            .is_some(),
        "the lock must have been released despite the panic"
    );
}

#[tokio::test]
async fn s7_invalidate_by_operation_forces_a_reload() {
    use coordkit::keygen::KeyGenerator;

    let regions = regions_with(
        RegionConfig::builder("search")
            .l1(true, Duration::from_secs(60), 1_000)
            .l2(true, Duration::from_secs(60))
            .build(),
    );
    let cache = coordinator(regions, InMemoryKv::new()).await;
    let keygen = KeyGenerator::new();
    let invocations = Arc::new(AtomicUsize::new(0));

    let args = vec!["x".to_string()];
    let key = keygen.key_for("getData", &args);

    let load = |invocations: Arc<AtomicUsize>| async move {
        invocations.fetch_add(1, Ordering::SeqCst);
        Ok(Some("data-x".to_string()))
    };

    let first = cache
        .get_or_load("search", &key, { let i = invocations.clone(); move || load(i) })
        .await
        .unwrap();
    assert_eq!(first.as_deref(), Some("data-x"));

    cache.invalidate_by_operation("search", "getData", &args).await.unwrap();

    let second = cache
        .get_or_load("search", &key, { let i = invocations.clone(); move || load(i) })
        .await
        .unwrap();
    assert_eq!(second.as_deref(), Some("data-x"));
    assert_eq!(invocations.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn s8_self_echo_is_suppressed_and_does_not_double_evict() {
    let regions = regions_with(
        RegionConfig::builder("sessions")
            .l1(true, Duration::from_secs(60), 1_000)
            .l2(true, Duration::from_secs(60))
            .build(),
    );
    let kv = InMemoryKv::new();
    let cache = coordinator(regions, kv).await;

    cache
        .put("sessions", "s1", &"payload".to_string())
        .await
        .unwrap();

    cache.invalidate("sessions", "s1").await.unwrap();

    // Give the subscriber task a chance to observe and (harmlessly) re-apply
    // its own echo before asserting the steady state.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let value: Option<String> = cache.get("sessions", "s1").await.unwrap();
    assert_eq!(value, None);
}
