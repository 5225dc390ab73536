//! Per-process config cache.
//!
//! Resolved config records are cached per fingerprint with one shared TTL.
//! An entry may be *negative* (a marker that no record exists at that
//! scope); the resolver only stores negatives for the system and
//! resource-default levels, where a miss is stable, never for
//! entity-specific levels where cold misses are the common case.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tollgate_core::{Fingerprint, Limit, OnUnavailable};

/// Snapshot of cache effectiveness counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    pub evictions: u64,
}

/// The decoded payload of one config record.
#[derive(Debug, Clone)]
pub(crate) struct ScopeConfig {
    pub(crate) limits: Vec<Limit>,
    pub(crate) on_unavailable: Option<OnUnavailable>,
}

/// A cached resolution of one scope: a record, or a marker that the scope
/// has none.
#[derive(Debug, Clone)]
pub(crate) enum CachedScope {
    Present(Arc<ScopeConfig>),
    Absent,
}

#[derive(Debug)]
struct Entry {
    value: CachedScope,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct Inner {
    map: HashMap<Fingerprint, Entry>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Fingerprint-keyed TTL cache with hit/miss/eviction counters.
///
/// A zero TTL disables caching entirely: every lookup is a miss and writes
/// are dropped. Capacity is unbounded; the TTL is the only bound, which is
/// fine for the small config cardinality this cache sees.
#[derive(Debug, Clone)]
pub(crate) struct ConfigCache {
    inner: Arc<Mutex<Inner>>,
    ttl: Duration,
}

impl ConfigCache {
    pub(crate) fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            ttl,
        }
    }

    pub(crate) fn get(&self, fingerprint: &Fingerprint) -> Option<CachedScope> {
        let mut inner = self.inner.lock().unwrap();
        if self.ttl.is_zero() {
            inner.misses += 1;
            return None;
        }
        match inner.map.get(fingerprint) {
            Some(entry) if entry.expires_at > Instant::now() => {
                let value = entry.value.clone();
                inner.hits += 1;
                Some(value)
            }
            Some(_) => {
                inner.map.remove(fingerprint);
                inner.evictions += 1;
                inner.misses += 1;
                None
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    pub(crate) fn put(&self, fingerprint: Fingerprint, value: CachedScope) {
        if self.ttl.is_zero() {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        inner.map.insert(
            fingerprint,
            Entry {
                value,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Drops one fingerprint. Counts as an eviction when it was present.
    pub(crate) fn invalidate(&self, fingerprint: &Fingerprint) {
        let mut inner = self.inner.lock().unwrap();
        if inner.map.remove(fingerprint).is_some() {
            inner.evictions += 1;
        }
    }

    /// Drops everything.
    pub(crate) fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        let dropped = inner.map.len() as u64;
        inner.map.clear();
        inner.evictions += dropped;
    }

    pub(crate) fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().unwrap();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            size: inner.map.len(),
            evictions: inner.evictions,
        }
    }
}
