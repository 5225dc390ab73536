//! Lease tests.
//!
//! Test organization:
//! - adjust.rs: estimate-then-reconcile, debt, burst clamping
//! - release.rs: compensating writes
//! - idempotence.rs: one-way transitions, no-op leases, drop semantics

use tollgate::{Limit, LimiterConfig, RateLimiter};
use tollgate_storage::MemoryStore;

mod release;

/// A limiter with one `tpm = 10/min` system default.
pub async fn tpm_limiter(store: &MemoryStore) -> RateLimiter<MemoryStore> {
    let limiter = RateLimiter::connect(
        store.clone(),
        LimiterConfig::builder().namespace("test").build(),
    )
    .await
    .expect("connect");
    limiter
        .set_system_defaults(&[Limit::per_minute("tpm", 10).unwrap()], None)
        .await
        .unwrap();
    limiter
}
