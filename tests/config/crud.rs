use super::connect;
use tollgate::{Limit, OnUnavailable};
use tollgate_storage::MemoryStore;

#[tokio::test]
async fn set_replaces_wholesale() {
    let store = MemoryStore::with_manual_clock();
    let limiter = connect(&store).await;

    limiter
        .set_system_defaults(
            &[
                Limit::per_minute("rpm", 10).unwrap(),
                Limit::per_minute("tpm", 100).unwrap(),
            ],
            Some(OnUnavailable::Allow),
        )
        .await
        .unwrap();

    // A second write with one limit and no policy replaces everything;
    // nothing merges.
    let replacement = vec![Limit::per_minute("rpm", 20).unwrap()];
    limiter.set_system_defaults(&replacement, None).await.unwrap();

    let defaults = limiter.get_system_defaults().await.unwrap().unwrap();
    assert_eq!(defaults.limits, replacement);
    assert_eq!(defaults.on_unavailable, None);
}

#[tokio::test]
async fn round_trips_at_every_scope() {
    let store = MemoryStore::with_manual_clock();
    let limiter = connect(&store).await;

    let system = vec![Limit::per_minute("rpm", 100).unwrap()];
    let resource = vec![Limit::per_minute("rpm", 50).unwrap()];
    let entity = vec![Limit::per_hour("rph", 1_000).unwrap()];
    let pair = vec![Limit::per_second("rps", 5).unwrap()];

    limiter
        .set_system_defaults(&system, Some(OnUnavailable::Block))
        .await
        .unwrap();
    limiter.set_resource_defaults("gpt-4", &resource).await.unwrap();
    limiter.set_limits("acct", None, &entity).await.unwrap();
    limiter.set_limits("acct", Some("gpt-4"), &pair).await.unwrap();

    let defaults = limiter.get_system_defaults().await.unwrap().unwrap();
    assert_eq!(defaults.limits, system);
    assert_eq!(defaults.on_unavailable, Some(OnUnavailable::Block));
    assert_eq!(
        limiter.get_resource_defaults("gpt-4").await.unwrap().unwrap(),
        resource
    );
    assert_eq!(limiter.get_limits("acct", None).await.unwrap().unwrap(), entity);
    assert_eq!(
        limiter.get_limits("acct", Some("gpt-4")).await.unwrap().unwrap(),
        pair
    );
}

#[tokio::test]
async fn delete_reports_existence() {
    let store = MemoryStore::with_manual_clock();
    let limiter = connect(&store).await;

    assert!(!limiter.delete_system_defaults().await.unwrap());
    limiter
        .set_system_defaults(&[Limit::per_minute("rpm", 10).unwrap()], None)
        .await
        .unwrap();
    assert!(limiter.delete_system_defaults().await.unwrap());
    assert!(limiter.get_system_defaults().await.unwrap().is_none());
}

#[tokio::test]
async fn lists_resources_with_defaults() {
    let store = MemoryStore::with_manual_clock();
    let limiter = connect(&store).await;

    assert!(limiter.list_resources_with_defaults().await.unwrap().is_empty());

    let limits = vec![Limit::per_minute("rpm", 10).unwrap()];
    limiter.set_resource_defaults("claude", &limits).await.unwrap();
    limiter.set_resource_defaults("gpt-4", &limits).await.unwrap();

    let mut resources = limiter.list_resources_with_defaults().await.unwrap();
    resources.sort();
    assert_eq!(resources, vec!["claude", "gpt-4"]);
}
