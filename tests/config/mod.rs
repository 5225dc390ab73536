//! Config tests.
//!
//! Test organization:
//! - hierarchy.rs: four-level precedence resolution
//! - cache.rs: TTL cache behavior, negative caching, eviction on mutation
//! - crud.rs: replace-wholesale semantics and the listing surface

use tollgate::{LimiterConfig, RateLimiter};
use tollgate_storage::MemoryStore;

mod cache;
mod crud;

pub async fn connect(store: &MemoryStore) -> RateLimiter<MemoryStore> {
    RateLimiter::connect(
        store.clone(),
        LimiterConfig::builder().namespace("test").build(),
    )
    .await
    .expect("connect")
}
