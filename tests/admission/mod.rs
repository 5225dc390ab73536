//! Admission tests.
//!
//! Test organization:
//! - single_bucket.rs: one-bucket admission, refill over time, rejection shapes
//! - bursts.rs: burst ceilings above the sustained rate
//! - cascade.rs: parent/child atomic admission
//! - fast_path.rs: speculative writes and their fallbacks
//! - validation.rs: consume-map and identifier validation

use tollgate::{LimiterConfig, RateLimiter};
use tollgate_storage::MemoryStore;

mod cascade;
mod fast_path;

/// A limiter over the given store, namespace `test`.
pub async fn connect(store: &MemoryStore) -> RateLimiter<MemoryStore> {
    RateLimiter::connect(
        store.clone(),
        LimiterConfig::builder().namespace("test").build(),
    )
    .await
    .expect("connect")
}
