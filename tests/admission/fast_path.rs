use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tollgate::{AcquireRequest, AdmissionEvent, Limit, LimiterConfig, RateLimiter};
use tollgate_storage::MemoryStore;

async fn instrumented(
    store: &MemoryStore,
) -> (RateLimiter<MemoryStore>, Arc<AtomicUsize>, Arc<AtomicUsize>) {
    let fast = Arc::new(AtomicUsize::new(0));
    let slow = Arc::new(AtomicUsize::new(0));
    let (f, s) = (Arc::clone(&fast), Arc::clone(&slow));
    let limiter = RateLimiter::connect(
        store.clone(),
        LimiterConfig::builder()
            .namespace("test")
            .on_event(move |event| {
                if let AdmissionEvent::Admitted { fast_path, .. } = event {
                    if *fast_path {
                        f.fetch_add(1, Ordering::SeqCst);
                    } else {
                        s.fetch_add(1, Ordering::SeqCst);
                    }
                }
            })
            .build(),
    )
    .await
    .unwrap();
    limiter
        .set_system_defaults(&[Limit::per_minute("rpm", 100).unwrap()], None)
        .await
        .unwrap();
    (limiter, fast, slow)
}

#[tokio::test]
async fn second_acquire_skips_the_read() {
    let store = MemoryStore::with_manual_clock();
    let (limiter, fast, slow) = instrumented(&store).await;

    // First acquire must read (cold cache, bucket does not even exist).
    limiter
        .acquire(AcquireRequest::new("acct", "search").consume("rpm", 1))
        .await
        .unwrap();
    assert_eq!((fast.load(Ordering::SeqCst), slow.load(Ordering::SeqCst)), (0, 1));

    // The write seeded the version cache; the next one is speculative.
    limiter
        .acquire(AcquireRequest::new("acct", "search").consume("rpm", 1))
        .await
        .unwrap();
    assert_eq!((fast.load(Ordering::SeqCst), slow.load(Ordering::SeqCst)), (1, 1));
}

#[tokio::test]
async fn stale_version_falls_back_to_the_slow_path() {
    let store = MemoryStore::with_manual_clock();
    let (limiter, fast, slow) = instrumented(&store).await;

    limiter
        .acquire(AcquireRequest::new("acct", "search").consume("rpm", 1))
        .await
        .unwrap();

    // A second client consumes on the same bucket, bumping its version
    // behind our back.
    let other = RateLimiter::connect(
        store.clone(),
        LimiterConfig::builder().namespace("test").build(),
    )
    .await
    .unwrap();
    other
        .acquire(AcquireRequest::new("acct", "search").consume("rpm", 5))
        .await
        .unwrap();

    // Our speculative write loses and the slow path takes over; nothing
    // is double-consumed.
    limiter
        .acquire(AcquireRequest::new("acct", "search").consume("rpm", 1))
        .await
        .unwrap();
    assert_eq!((fast.load(Ordering::SeqCst), slow.load(Ordering::SeqCst)), (0, 2));
    assert_eq!(limiter.available("acct", "search").await.unwrap()["rpm"], 93);
}

#[tokio::test]
async fn insufficient_cached_balance_defers_to_refill() {
    let store = MemoryStore::with_manual_clock();
    let (limiter, fast, slow) = instrumented(&store).await;

    limiter
        .acquire(AcquireRequest::new("acct", "search").consume("rpm", 99))
        .await
        .unwrap();

    // The cached state cannot prove admission for 2 more; only fresh
    // refill credit can. Must not fast-path (and with a frozen clock,
    // must reject).
    assert!(limiter
        .acquire(AcquireRequest::new("acct", "search").consume("rpm", 2))
        .await
        .is_err());
    assert_eq!(fast.load(Ordering::SeqCst), 0);
    assert_eq!(slow.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn opt_outs_disable_the_fast_path() {
    let store = MemoryStore::with_manual_clock();
    let (limiter, fast, slow) = instrumented(&store).await;

    limiter
        .acquire(AcquireRequest::new("acct", "search").consume("rpm", 1))
        .await
        .unwrap();
    limiter
        .acquire(
            AcquireRequest::new("acct", "search")
                .consume("rpm", 1)
                .skip_fast_path(),
        )
        .await
        .unwrap();
    assert_eq!((fast.load(Ordering::SeqCst), slow.load(Ordering::SeqCst)), (0, 2));

    // Config-level opt-out.
    let plain = RateLimiter::connect(
        store.clone(),
        LimiterConfig::builder()
            .namespace("test")
            .disable_speculative_writes()
            .build(),
    )
    .await
    .unwrap();
    plain
        .acquire(AcquireRequest::new("acct", "search").consume("rpm", 1))
        .await
        .unwrap();
    plain
        .acquire(AcquireRequest::new("acct", "search").consume("rpm", 1))
        .await
        .unwrap();
    assert_eq!(limiter.available("acct", "search").await.unwrap()["rpm"], 96);
}

#[tokio::test]
async fn cascade_never_uses_the_fast_path() {
    let store = MemoryStore::with_manual_clock();
    let (limiter, fast, _slow) = instrumented(&store).await;
    limiter.create_entity("org", None, None).await.unwrap();
    limiter
        .create_entity("team", Some("org"), None)
        .await
        .unwrap();
    limiter
        .set_limits("org", None, &[Limit::per_minute("rpm", 50).unwrap()])
        .await
        .unwrap();

    for _ in 0..3 {
        limiter
            .acquire(AcquireRequest::new("team", "search").consume("rpm", 1).cascade())
            .await
            .unwrap();
    }
    assert_eq!(fast.load(Ordering::SeqCst), 0);
}
