//! Distributed rate limiting with leases over a shared key-value store.
//!
//! Many client processes admit work against the same named token-bucket
//! limits, scoped to an `(entity, resource)` pair and held in a backing
//! store behind the [`StorageAdapter`](tollgate_storage::StorageAdapter)
//! contract. Admission decisions reflect one consistent bucket state:
//! conditional writes serialize concurrent consumers, cascading
//! parent/child limits move in one atomic transaction, and wait-time
//! estimates stay exact because all refill math runs on the store's
//! monotonic clock with drift-free integer arithmetic.
//!
//! # Features
//!
//! - **Leases**: an admission returns a [`Lease`]: adjust the consumption
//!   after the fact (estimate-then-reconcile, debt allowed), commit on
//!   success, or release to return the tokens on failure
//! - **Config hierarchy**: limits resolve from entity+resource, entity,
//!   resource, then system scope, through a per-process TTL cache with
//!   negative caching where misses are stable
//! - **Fast path**: single-bucket admissions can skip the read round trip
//!   with a speculative conditional write
//! - **Failure modes**: infrastructure faults either fail closed
//!   ([`Error::Unavailable`]) or fail open into a no-op lease, per the
//!   resolved `on_unavailable` policy
//! - **Namespaces**: tenant keys are isolated behind opaque random
//!   prefixes
//! - **Tower integration**: [`AdmissionLayer`] gates any service behind
//!   the limiter
//!
//! # Examples
//!
//! ```
//! use tollgate::{AcquireRequest, Limit, LimiterConfig, RateLimiter};
//! use tollgate_storage::MemoryStore;
//!
//! # async fn example() -> Result<(), tollgate::Error> {
//! let limiter = RateLimiter::connect(
//!     MemoryStore::new(),
//!     LimiterConfig::builder().namespace("prod").build(),
//! )
//! .await?;
//!
//! limiter
//!     .set_system_defaults(&[Limit::per_minute("rpm", 600)?], None)
//!     .await?;
//!
//! let mut lease = limiter
//!     .acquire(AcquireRequest::new("acct-1", "search").consume("rpm", 1))
//!     .await?;
//!
//! // ... do the rate-limited work ...
//!
//! lease.commit().await?;
//! # Ok(())
//! # }
//! ```
//!
//! The API is async-first; blocking callers wrap calls in their runtime's
//! `block_on` rather than using a parallel sync surface.

mod admin;
mod admission;
mod backoff;
mod cache;
mod config;
mod error;
mod events;
mod layer;
mod lease;
mod namespace;
mod resolver;
mod speculative;

pub use admin::SystemDefaults;
pub use admission::AcquireRequest;
pub use cache::CacheStats;
pub use config::{LimiterConfig, LimiterConfigBuilder};
pub use error::Error;
pub use events::AdmissionEvent;
pub use layer::{Admission, AdmissionError, AdmissionLayer, RequestExtractor};
pub use lease::Lease;

// The vocabulary types callers hold.
pub use tollgate_core::{
    ConfigScope, ConsumeMap, Limit, LimitStatus, OnUnavailable, RateLimitExceeded, ValidationError,
};

use crate::cache::ConfigCache;
use crate::speculative::SpeculativeCache;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tollgate_storage::{NamespaceRecord, StorageAdapter, StorageError, SCHEMA_VERSION};

/// A handle to one namespace of the distributed limiter.
///
/// Generic over the storage adapter; clones share the config cache and the
/// speculative version cache, so cloning per task is the intended usage.
#[derive(Debug)]
pub struct RateLimiter<S> {
    pub(crate) storage: S,
    pub(crate) config: Arc<LimiterConfig>,
    pub(crate) namespace: NamespaceRecord,
    pub(crate) cache: ConfigCache,
    pub(crate) speculative: SpeculativeCache,
}

impl<S: Clone> Clone for RateLimiter<S> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
            config: Arc::clone(&self.config),
            namespace: self.namespace.clone(),
            cache: self.cache.clone(),
            speculative: self.speculative.clone(),
        }
    }
}

impl<S: StorageAdapter> RateLimiter<S> {
    /// Connects to the store: verifies the schema-version record (writing
    /// it on first ever use) and resolves the namespace's opaque prefix
    /// (registering the namespace on first use).
    ///
    /// A schema mismatch is fatal: this client must not touch records it
    /// does not understand.
    pub async fn connect(storage: S, config: LimiterConfig) -> Result<Self, Error> {
        match storage
            .get_schema_version()
            .await
            .map_err(Error::from_storage)?
        {
            Some(found) if found == SCHEMA_VERSION => {}
            Some(found) => {
                return Err(Error::SchemaVersion {
                    found,
                    expected: SCHEMA_VERSION,
                })
            }
            None => match storage.put_schema_version_new(SCHEMA_VERSION).await {
                Ok(()) => {}
                Err(StorageError::AlreadyExists { .. }) => {
                    // Lost the first-write race; the winner's version must
                    // still match ours.
                    let found = storage
                        .get_schema_version()
                        .await
                        .map_err(Error::from_storage)?
                        .unwrap_or(SCHEMA_VERSION);
                    if found != SCHEMA_VERSION {
                        return Err(Error::SchemaVersion {
                            found,
                            expected: SCHEMA_VERSION,
                        });
                    }
                }
                Err(other) => return Err(Error::from_storage(other)),
            },
        }

        let namespace = namespace::resolve_or_register(&storage, &config.namespace).await?;

        #[cfg(feature = "metrics")]
        {
            metrics::describe_counter!(
                "tollgate_admissions_total",
                "Admissions by result (admitted, rejected, fail_open, fail_closed)"
            );
            metrics::describe_counter!(
                "tollgate_fast_path_total",
                "Speculative write attempts by result"
            );
            metrics::describe_counter!(
                "tollgate_conflict_retries_total",
                "Conditional writes retried after losing a version race"
            );
            metrics::describe_counter!(
                "tollgate_config_cache_total",
                "Config cache lookups by result"
            );
            metrics::describe_histogram!(
                "tollgate_admission_attempts",
                "Write attempts per admitted acquire"
            );
        }

        Ok(Self {
            cache: ConfigCache::new(config.config_cache_ttl),
            speculative: SpeculativeCache::default(),
            config: Arc::new(config),
            namespace,
            storage,
        })
    }

    /// The limiter's configured name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// The human name of this limiter's namespace.
    pub fn namespace(&self) -> &str {
        &self.namespace.name
    }

    /// The opaque key prefix every storage key carries.
    pub(crate) fn opaque_ns(&self) -> &str {
        &self.namespace.opaque_id
    }

    /// Best-effort probe of the backing store. Never raises.
    pub async fn is_available(&self, timeout: Duration) -> bool {
        self.storage.is_reachable(timeout).await
    }

    /// Drops every cached config resolution.
    pub fn invalidate_config_cache(&self) {
        self.cache.clear();
    }

    /// Drops the cached resolution of one scope.
    pub fn invalidate_config_scope(&self, scope: &ConfigScope) {
        self.invalidate_scope(scope);
    }

    /// Hit/miss/size/eviction counters of the config cache.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Applies the configured operation timeout to one storage call; an
    /// overrun is an infrastructure fault like any other.
    pub(crate) async fn with_timeout<T>(
        &self,
        operation: impl Future<Output = Result<T, StorageError>>,
    ) -> Result<T, StorageError> {
        match self.config.operation_timeout {
            Some(limit) => match tokio::time::timeout(limit, operation).await {
                Ok(result) => result,
                Err(_) => Err(StorageError::infrastructure(
                    "storage operation timed out",
                )),
            },
            None => operation.await,
        }
    }
}
