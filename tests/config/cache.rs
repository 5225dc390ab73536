use std::time::Duration;
use tollgate::{Limit, LimiterConfig, RateLimiter};
use tollgate_storage::{MemoryStore, StorageAdapter};

/// The store fails its next call; a read that succeeds anyway must have
/// been served from the cache.
#[tokio::test]
async fn reads_inside_the_ttl_never_touch_storage() {
    let store = MemoryStore::with_manual_clock();
    let limiter = super::connect(&store).await;

    let limits = vec![Limit::per_minute("rpm", 10).unwrap()];
    limiter.set_system_defaults(&limits, None).await.unwrap();

    store.fail_next(1);
    let defaults = limiter.get_system_defaults().await.unwrap().unwrap();
    assert_eq!(defaults.limits, limits);

    // The injected fault is still pending: the cache answered.
    assert!(store.get_schema_version().await.is_err());
}

#[tokio::test]
async fn zero_ttl_disables_the_cache() {
    let store = MemoryStore::with_manual_clock();
    let limiter = RateLimiter::connect(
        store.clone(),
        LimiterConfig::builder()
            .namespace("test")
            .config_cache_ttl(Duration::ZERO)
            .build(),
    )
    .await
    .unwrap();

    let limits = vec![Limit::per_minute("rpm", 10).unwrap()];
    limiter.set_system_defaults(&limits, None).await.unwrap();

    store.fail_next(1);
    assert!(limiter.get_system_defaults().await.is_err());
}

#[tokio::test]
async fn resource_misses_are_cached_negatively() {
    let store = MemoryStore::with_manual_clock();
    let limiter = super::connect(&store).await;

    assert!(limiter.get_resource_defaults("gpt-4").await.unwrap().is_none());

    // Storage down: the negative marker still answers.
    store.fail_all(true);
    assert!(limiter.get_resource_defaults("gpt-4").await.unwrap().is_none());
    store.fail_all(false);
}

#[tokio::test]
async fn entity_misses_are_not_cached() {
    let store = MemoryStore::with_manual_clock();
    let limiter = super::connect(&store).await;

    assert!(limiter.get_limits("acct", None).await.unwrap().is_none());

    // No negative marker exists for entity scopes: this read must hit
    // storage, and storage is down.
    store.fail_all(true);
    assert!(limiter.get_limits("acct", None).await.is_err());
    store.fail_all(false);
}

/// A stale negative marker must not shadow a write: set after a cached
/// miss, then read back.
#[tokio::test]
async fn writes_replace_negative_markers() {
    let store = MemoryStore::with_manual_clock();
    let limiter = super::connect(&store).await;

    assert!(limiter.get_resource_defaults("gpt-4").await.unwrap().is_none());

    let limits = vec![Limit::per_minute("rpm", 50).unwrap()];
    limiter.set_resource_defaults("gpt-4", &limits).await.unwrap();
    assert_eq!(
        limiter.get_resource_defaults("gpt-4").await.unwrap().unwrap(),
        limits
    );
}

#[tokio::test]
async fn deletes_evict_their_scope() {
    let store = MemoryStore::with_manual_clock();
    let limiter = super::connect(&store).await;

    let limits = vec![Limit::per_minute("rpm", 50).unwrap()];
    limiter.set_resource_defaults("gpt-4", &limits).await.unwrap();
    assert!(limiter.get_resource_defaults("gpt-4").await.unwrap().is_some());

    assert!(limiter.delete_resource_defaults("gpt-4").await.unwrap());
    assert!(limiter.get_resource_defaults("gpt-4").await.unwrap().is_none());
}

#[tokio::test]
async fn stats_track_hits_misses_and_evictions() {
    let store = MemoryStore::with_manual_clock();
    let limiter = super::connect(&store).await;

    let limits = vec![Limit::per_minute("rpm", 10).unwrap()];
    limiter.set_system_defaults(&limits, None).await.unwrap();

    let before = limiter.cache_stats();
    limiter.get_system_defaults().await.unwrap();
    limiter.get_system_defaults().await.unwrap();
    let after = limiter.cache_stats();
    assert_eq!(after.hits, before.hits + 2);

    limiter.invalidate_config_cache();
    assert_eq!(limiter.cache_stats().size, 0);
    assert!(limiter.cache_stats().evictions > before.evictions);
}

#[tokio::test]
async fn expired_entries_fall_back_to_storage() {
    let store = MemoryStore::with_manual_clock();
    let limiter = RateLimiter::connect(
        store.clone(),
        LimiterConfig::builder()
            .namespace("test")
            .config_cache_ttl(Duration::from_millis(20))
            .build(),
    )
    .await
    .unwrap();

    let limits = vec![Limit::per_minute("rpm", 10).unwrap()];
    limiter.set_system_defaults(&limits, None).await.unwrap();

    // The cache TTL runs on process time, not the store clock.
    tokio::time::sleep(Duration::from_millis(30)).await;
    let defaults = limiter.get_system_defaults().await.unwrap().unwrap();
    assert_eq!(defaults.limits, limits);
    assert!(limiter.cache_stats().evictions >= 1);
}
