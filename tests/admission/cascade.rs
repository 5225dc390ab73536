use super::connect;
use tollgate::{AcquireRequest, Error, Limit};
use tollgate_storage::MemoryStore;

async fn family(store: &MemoryStore) -> tollgate::RateLimiter<MemoryStore> {
    let limiter = connect(store).await;
    limiter.create_entity("org", None, None).await.unwrap();
    limiter
        .create_entity("team", Some("org"), None)
        .await
        .unwrap();
    limiter
        .set_limits("team", None, &[Limit::per_minute("rpm", 100).unwrap()])
        .await
        .unwrap();
    limiter
        .set_limits("org", None, &[Limit::per_minute("rpm", 5).unwrap()])
        .await
        .unwrap();
    limiter
}

#[tokio::test]
async fn parent_limit_caps_the_child() {
    let store = MemoryStore::with_manual_clock();
    let limiter = family(&store).await;

    for _ in 0..5 {
        limiter
            .acquire(AcquireRequest::new("team", "search").consume("rpm", 1).cascade())
            .await
            .unwrap();
    }

    let err = limiter
        .acquire(AcquireRequest::new("team", "search").consume("rpm", 1).cascade())
        .await
        .unwrap_err();
    let Error::RateLimitExceeded(exceeded) = err else {
        panic!("expected a denial");
    };
    // Statuses from both buckets, with the parent as the violation.
    assert_eq!(exceeded.statuses.len(), 2);
    let violation = exceeded.primary_violation().unwrap();
    assert_eq!(violation.entity_id, "org");
    assert!(exceeded.statuses.iter().any(|s| s.entity_id == "team" && !s.exceeded));
}

#[tokio::test]
async fn rejection_consumes_neither_bucket() {
    let store = MemoryStore::with_manual_clock();
    let limiter = family(&store).await;

    for _ in 0..5 {
        limiter
            .acquire(AcquireRequest::new("team", "search").consume("rpm", 1).cascade())
            .await
            .unwrap();
    }
    assert!(limiter
        .acquire(AcquireRequest::new("team", "search").consume("rpm", 1).cascade())
        .await
        .is_err());

    let child = limiter.available("team", "search").await.unwrap();
    let parent = limiter.available("org", "search").await.unwrap();
    assert_eq!(child["rpm"], 95);
    assert_eq!(parent["rpm"], 0);
}

#[tokio::test]
async fn both_buckets_move_together() {
    let store = MemoryStore::with_manual_clock();
    let limiter = family(&store).await;

    limiter
        .acquire(AcquireRequest::new("team", "search").consume("rpm", 3).cascade())
        .await
        .unwrap();

    assert_eq!(limiter.available("team", "search").await.unwrap()["rpm"], 97);
    assert_eq!(limiter.available("org", "search").await.unwrap()["rpm"], 2);
}

#[tokio::test]
async fn cascade_without_parent_is_plain_admission() {
    let store = MemoryStore::with_manual_clock();
    let limiter = connect(&store).await;
    limiter
        .set_system_defaults(&[Limit::per_minute("rpm", 10).unwrap()], None)
        .await
        .unwrap();

    // No entity record at all: cascade is a no-op.
    let lease = limiter
        .acquire(AcquireRequest::new("solo", "search").consume("rpm", 1).cascade())
        .await
        .unwrap();
    assert_eq!(lease.statuses().len(), 1);

    // A record without a parent behaves the same.
    limiter.create_entity("rootless", None, None).await.unwrap();
    let lease = limiter
        .acquire(AcquireRequest::new("rootless", "search").consume("rpm", 1).cascade())
        .await
        .unwrap();
    assert_eq!(lease.statuses().len(), 1);
}

#[tokio::test]
async fn parent_consumes_only_the_limits_it_defines() {
    let store = MemoryStore::with_manual_clock();
    let limiter = connect(&store).await;
    limiter.create_entity("org", None, None).await.unwrap();
    limiter
        .create_entity("team", Some("org"), None)
        .await
        .unwrap();
    limiter
        .set_limits(
            "team",
            None,
            &[
                Limit::per_minute("rpm", 100).unwrap(),
                Limit::per_minute("tpm", 1_000).unwrap(),
            ],
        )
        .await
        .unwrap();
    // The parent tracks requests only, not tokens.
    limiter
        .set_limits("org", None, &[Limit::per_minute("rpm", 50).unwrap()])
        .await
        .unwrap();

    limiter
        .acquire(
            AcquireRequest::new("team", "chat")
                .consume("rpm", 1)
                .consume("tpm", 200)
                .cascade(),
        )
        .await
        .unwrap();

    assert_eq!(limiter.available("org", "chat").await.unwrap()["rpm"], 49);
    let team = limiter.available("team", "chat").await.unwrap();
    assert_eq!(team["rpm"], 99);
    assert_eq!(team["tpm"], 800);
}
