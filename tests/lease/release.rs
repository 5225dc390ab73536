use super::tpm_limiter;
use tollgate::{AcquireRequest, Limit};
use tollgate_storage::MemoryStore;

#[tokio::test]
async fn release_restores_the_exact_consumption() {
    let store = MemoryStore::with_manual_clock();
    let limiter = tpm_limiter(&store).await;

    let mut lease = limiter
        .acquire(AcquireRequest::new("acct", "chat").consume("tpm", 7))
        .await
        .unwrap();
    assert_eq!(limiter.available("acct", "chat").await.unwrap()["tpm"], 3);

    lease.release().await;
    assert_eq!(limiter.available("acct", "chat").await.unwrap()["tpm"], 10);
}

#[tokio::test]
async fn release_ignores_adjustments() {
    let store = MemoryStore::with_manual_clock();
    let limiter = tpm_limiter(&store).await;

    let mut lease = limiter
        .acquire(AcquireRequest::new("acct", "chat").consume("tpm", 4))
        .await
        .unwrap();
    // The adjustment was never written; release compensates only what
    // acquire consumed.
    lease.adjust("tpm", 100).unwrap();
    lease.release().await;

    assert_eq!(limiter.available("acct", "chat").await.unwrap()["tpm"], 10);
}

#[tokio::test]
async fn cascade_release_compensates_each_bucket() {
    let store = MemoryStore::with_manual_clock();
    let limiter = tpm_limiter(&store).await;
    limiter.create_entity("org", None, None).await.unwrap();
    limiter
        .create_entity("team", Some("org"), None)
        .await
        .unwrap();
    limiter
        .set_limits("team", None, &[Limit::per_minute("tpm", 100).unwrap()])
        .await
        .unwrap();
    limiter
        .set_limits("org", None, &[Limit::per_minute("tpm", 50).unwrap()])
        .await
        .unwrap();

    let mut lease = limiter
        .acquire(AcquireRequest::new("team", "chat").consume("tpm", 10).cascade())
        .await
        .unwrap();
    lease.release().await;

    assert_eq!(limiter.available("team", "chat").await.unwrap()["tpm"], 100);
    assert_eq!(limiter.available("org", "chat").await.unwrap()["tpm"], 50);
}

/// The caller releasing is already handling a failure; a broken store must
/// not add a second error on top.
#[tokio::test]
async fn failed_compensating_write_does_not_raise() {
    let store = MemoryStore::with_manual_clock();
    let limiter = tpm_limiter(&store).await;

    let mut lease = limiter
        .acquire(AcquireRequest::new("acct", "chat").consume("tpm", 7))
        .await
        .unwrap();

    store.fail_all(true);
    lease.release().await;
    store.fail_all(false);

    // The consumption leaked; that is the documented trade.
    assert_eq!(limiter.available("acct", "chat").await.unwrap()["tpm"], 3);
}

#[tokio::test]
async fn release_tolerates_an_interleaved_writer() {
    let store = MemoryStore::with_manual_clock();
    let limiter = tpm_limiter(&store).await;

    let mut lease = limiter
        .acquire(AcquireRequest::new("acct", "chat").consume("tpm", 4))
        .await
        .unwrap();

    // Another admission lands between acquire and release.
    limiter
        .acquire(AcquireRequest::new("acct", "chat").consume("tpm", 2).skip_fast_path())
        .await
        .unwrap();

    lease.release().await;
    // Only the released lease's consumption comes back.
    assert_eq!(limiter.available("acct", "chat").await.unwrap()["tpm"], 8);
}
