use std::time::Duration;
use tollgate::{AcquireRequest, Error, Limit, LimiterConfig, OnUnavailable, RateLimiter};
use tollgate_storage::MemoryStore;

#[tokio::test]
async fn block_policy_raises_unavailable() {
    let store = MemoryStore::with_manual_clock();
    let limiter = RateLimiter::connect(
        store.clone(),
        LimiterConfig::builder().namespace("test").build(),
    )
    .await
    .unwrap();
    limiter
        .set_system_defaults(
            &[Limit::per_minute("rpm", 10).unwrap()],
            Some(OnUnavailable::Block),
        )
        .await
        .unwrap();

    store.fail_all(true);
    let err = limiter
        .acquire(AcquireRequest::new("acct", "search").consume("rpm", 1))
        .await
        .unwrap_err();
    assert!(err.is_unavailable());
    assert!(!err.is_rate_limited());
    store.fail_all(false);
}

#[tokio::test]
async fn denials_are_not_gated() {
    let store = MemoryStore::with_manual_clock();
    let limiter = RateLimiter::connect(
        store.clone(),
        LimiterConfig::builder()
            .namespace("test")
            .on_unavailable(OnUnavailable::Allow)
            .build(),
    )
    .await
    .unwrap();
    limiter
        .set_system_defaults(&[Limit::per_minute("rpm", 1).unwrap()], None)
        .await
        .unwrap();

    limiter
        .acquire(AcquireRequest::new("acct", "search").consume("rpm", 1))
        .await
        .unwrap();
    // A rate-limit denial is a business outcome; ALLOW must not swallow
    // it into a no-op lease.
    let err = limiter
        .acquire(AcquireRequest::new("acct", "search").consume("rpm", 1))
        .await
        .unwrap_err();
    assert!(err.is_rate_limited());
}

#[tokio::test]
async fn validation_errors_are_not_gated() {
    let store = MemoryStore::with_manual_clock();
    let limiter = RateLimiter::connect(
        store.clone(),
        LimiterConfig::builder()
            .namespace("test")
            .on_unavailable(OnUnavailable::Allow)
            .build(),
    )
    .await
    .unwrap();
    limiter
        .set_system_defaults(&[Limit::per_minute("rpm", 10).unwrap()], None)
        .await
        .unwrap();

    let err = limiter
        .acquire(AcquireRequest::new("acct", "search").consume("nope", 1))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test]
async fn reachability_probe_reflects_the_store() {
    let store = MemoryStore::with_manual_clock();
    let limiter = RateLimiter::connect(
        store.clone(),
        LimiterConfig::builder().namespace("test").build(),
    )
    .await
    .unwrap();

    assert!(limiter.is_available(Duration::from_millis(10)).await);
    store.fail_all(true);
    assert!(!limiter.is_available(Duration::from_millis(10)).await);
    store.fail_all(false);
}

#[tokio::test]
async fn operation_timeout_is_an_infrastructure_fault() {
    // The memory store answers instantly, so an absurdly small timeout
    // still passes; this pins the classification, not the race.
    let store = MemoryStore::with_manual_clock();
    let limiter = RateLimiter::connect(
        store.clone(),
        LimiterConfig::builder()
            .namespace("test")
            .operation_timeout(Duration::from_secs(5))
            .build(),
    )
    .await
    .unwrap();
    limiter
        .set_system_defaults(&[Limit::per_minute("rpm", 10).unwrap()], None)
        .await
        .unwrap();
    limiter
        .acquire(AcquireRequest::new("acct", "search").consume("rpm", 1))
        .await
        .unwrap();
}
