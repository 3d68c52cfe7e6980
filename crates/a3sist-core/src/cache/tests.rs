use super::*;
use std::sync::atomic::AtomicUsize;

fn cache() -> Arc<SingleFlightCache<String>> {
    Arc::new(SingleFlightCache::new(CacheConfig::default()))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_run_factory_once() {
    let cache = cache();
    let counter = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..32)
        .map(|_| {
            let cache = cache.clone();
            let counter = counter.clone();
            tokio::spawn(async move {
                cache
                    .get_or_create("same-key", None, || async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        "value".to_string()
                    })
                    .await
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.await.unwrap(), "value");
    }
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(cache.stats().misses, 1);
    assert_eq!(cache.stats().in_flight, 0);
}

#[tokio::test]
async fn test_later_callers_hit_without_factory() {
    let cache = cache();
    let counter = AtomicUsize::new(0);
    cache
        .get_or_create("k", None, || async { "first".to_string() })
        .await;

    let value = cache
        .get_or_create("k", None, || async {
            counter.fetch_add(1, Ordering::SeqCst);
            "second".to_string()
        })
        .await;
    assert_eq!(value, "first");
    assert_eq!(counter.load(Ordering::SeqCst), 0);
    assert_eq!(cache.stats().hits, 1);
}

#[tokio::test]
async fn test_distinct_keys_produce_independently() {
    let cache = cache();
    let a = cache.get_or_create("a", None, || async { "A".to_string() }).await;
    let b = cache.get_or_create("b", None, || async { "B".to_string() }).await;
    assert_eq!((a.as_str(), b.as_str()), ("A", "B"));
    assert_eq!(cache.len(), 2);
}

#[tokio::test]
async fn test_errors_are_not_cached() {
    let cache = cache();
    let failed: Result<String, &str> = cache
        .get_or_try_create("k", None, || async { Err("nope") })
        .await;
    assert_eq!(failed, Err("nope"));
    assert!(cache.get("k").is_none());
    assert_eq!(cache.stats().in_flight, 0);

    let ok: Result<String, &str> = cache
        .get_or_try_create("k", None, || async { Ok("yes".to_string()) })
        .await;
    assert_eq!(ok.unwrap(), "yes");
    assert_eq!(cache.get("k").as_deref(), Some("yes"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_coalesce_shares_overlapping_production() {
    let cache = cache();
    let counter = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let cache = cache.clone();
            let counter = counter.clone();
            tokio::spawn(async move {
                cache
                    .coalesce("scan", || async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok::<_, String>("report".to_string())
                    })
                    .await
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), "report");
    }
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert!(cache.is_empty());
    assert_eq!(cache.stats().in_flight, 0);
}

#[tokio::test]
async fn test_coalesce_does_not_keep_finished_values() {
    let cache = cache();
    let counter = AtomicUsize::new(0);

    for expected in 1..=2 {
        let value: Result<String, String> = cache
            .coalesce("scan", || async {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(format!("run {}", n))
            })
            .await;
        assert_eq!(value.unwrap(), format!("run {}", expected));
        assert!(cache.get("scan").is_none());
    }
    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[test]
fn test_expired_entries_are_misses() {
    let cache = cache();
    cache.insert("live", "v".to_string(), Duration::from_secs(60));
    cache.insert("dead", "v".to_string(), Duration::ZERO);

    assert!(cache.get("live").is_some());
    assert!(cache.get("dead").is_none());
    assert_eq!(cache.compact(), 1);
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_compaction_evicts_soonest_expiring() {
    let cache = SingleFlightCache::new(CacheConfig::default().with_max_entries(2));
    cache.entries.insert(
        "soon".to_string(),
        CacheEntry {
            value: 1,
            expires_at: Instant::now() + Duration::from_secs(10),
        },
    );
    cache.entries.insert(
        "later".to_string(),
        CacheEntry {
            value: 2,
            expires_at: Instant::now() + Duration::from_secs(100),
        },
    );
    cache.entries.insert(
        "latest".to_string(),
        CacheEntry {
            value: 3,
            expires_at: Instant::now() + Duration::from_secs(1000),
        },
    );

    assert_eq!(cache.compact(), 1);
    assert!(cache.get("soon").is_none());
    assert_eq!(cache.get("later"), Some(2));
    assert_eq!(cache.get("latest"), Some(3));
}

#[test]
fn test_insert_over_limit_compacts() {
    let cache = SingleFlightCache::new(CacheConfig::default().with_max_entries(2));
    for (i, key) in ["a", "b", "c"].into_iter().enumerate() {
        cache.insert(key, i, Duration::from_secs(10 + i as u64));
    }
    assert_eq!(cache.len(), 2);
    assert!(cache.get("a").is_none());
}

#[test]
fn test_fingerprint_separates_parts() {
    assert_ne!(fingerprint(["ab", "c"]), fingerprint(["a", "bc"]));
    assert_eq!(fingerprint(["x", "y"]), fingerprint(["x", "y"]));
    assert_eq!(fingerprint(["x"]).len(), 64);
}
