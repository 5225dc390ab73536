//! Version cache behind the speculative write path.
//!
//! Every successful bucket read or write deposits the observed state and
//! version tag here. A later single-bucket acquire can then attempt a
//! conditional write without the read round trip; if the version raced,
//! the store rejects the write, the entry is dropped, and the slow path
//! takes over.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tollgate_core::BucketState;

#[derive(Debug, Clone)]
pub(crate) struct CachedBucket {
    pub(crate) version: u64,
    pub(crate) state: BucketState,
    /// Server clock observed with this state. The fast path checks against
    /// this timestamp (granting no refill credit), which is conservative:
    /// refill only adds tokens.
    pub(crate) server_ms: i64,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct SpeculativeCache {
    inner: Arc<Mutex<HashMap<String, CachedBucket>>>,
}

impl SpeculativeCache {
    pub(crate) fn get(&self, key: &str) -> Option<CachedBucket> {
        self.inner.lock().unwrap().get(key).cloned()
    }

    pub(crate) fn insert(&self, key: String, version: u64, state: BucketState, server_ms: i64) {
        self.inner.lock().unwrap().insert(
            key,
            CachedBucket {
                version,
                state,
                server_ms,
            },
        );
    }

    pub(crate) fn remove(&self, key: &str) {
        self.inner.lock().unwrap().remove(key);
    }
}
