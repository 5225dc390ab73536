//! Config resolution.
//!
//! Effective limits for an `(entity, resource)` pair come from the first
//! scope in precedence order that stores a non-empty limit set:
//! entity+resource, entity-default, resource-default, system-default, then
//! the caller-supplied fallback. Every level is consulted through the
//! config cache; storage misses at the system and resource levels are
//! cached negatively, entity-level misses are not (cold entities are the
//! common case and would bloat the cache).
//!
//! The `on_unavailable` policy is resolved from the system default only
//! (no narrower scope may define it) and falls back to the limiter's
//! constructor default when resolution itself fails.

use crate::cache::{CachedScope, ScopeConfig};
use crate::error::Error;
use crate::RateLimiter;
use std::sync::Arc;
use tollgate_core::{ConfigScope, Fingerprint, Limit, OnUnavailable, ScopeKind};
use tollgate_storage::StorageAdapter;

impl<S: StorageAdapter> RateLimiter<S> {
    /// Consults one scope through the cache, reading storage on a miss.
    pub(crate) async fn lookup_scope(&self, scope: &ConfigScope) -> Result<CachedScope, Error> {
        let fingerprint = Fingerprint::for_scope(self.opaque_ns(), scope);
        if let Some(cached) = self.cache.get(&fingerprint) {
            #[cfg(feature = "metrics")]
            metrics::counter!("tollgate_config_cache_total", "result" => "hit").increment(1);
            return Ok(cached);
        }
        #[cfg(feature = "metrics")]
        metrics::counter!("tollgate_config_cache_total", "result" => "miss").increment(1);

        let key = scope.key(self.opaque_ns());
        let record = self
            .with_timeout(self.storage.get_config(&key))
            .await
            .map_err(Error::from_storage)?;

        let resolved = match record {
            Some(record) => CachedScope::Present(Arc::new(ScopeConfig {
                limits: record.limits()?,
                on_unavailable: record.on_unavailable,
            })),
            None => CachedScope::Absent,
        };

        let cache_negative = matches!(
            scope.kind(),
            ScopeKind::System | ScopeKind::Resource
        );
        match &resolved {
            CachedScope::Absent if !cache_negative => {}
            _ => self.cache.put(fingerprint, resolved.clone()),
        }
        Ok(resolved)
    }

    /// Walks the precedence chain and returns the effective limit set.
    ///
    /// `fallback` is the caller-supplied in-memory set, consulted only
    /// when no stored scope matches.
    pub(crate) async fn resolve_limits(
        &self,
        entity_id: &str,
        resource: &str,
        fallback: Option<&[Limit]>,
    ) -> Result<Vec<Limit>, Error> {
        let chain = [
            ConfigScope::EntityResource(entity_id.to_string(), resource.to_string()),
            ConfigScope::Entity(entity_id.to_string()),
            ConfigScope::Resource(resource.to_string()),
            ConfigScope::System,
        ];
        for scope in &chain {
            if let CachedScope::Present(config) = self.lookup_scope(scope).await? {
                // A system record may exist solely to pin the
                // unavailability policy; an empty limit set is not a hit.
                if !config.limits.is_empty() {
                    return Ok(config.limits.clone());
                }
            }
        }
        if let Some(limits) = fallback {
            if !limits.is_empty() {
                return Ok(limits.to_vec());
            }
        }
        Err(Error::NoLimitsConfigured {
            entity_id: entity_id.to_string(),
            resource: resource.to_string(),
        })
    }

    /// The effective unavailability policy for one acquire.
    ///
    /// Precedence: per-call override, then the system-default record, then
    /// the constructor default. Infrastructure failures during this lookup
    /// must not mask the policy decision, so they collapse to the
    /// constructor default.
    pub(crate) async fn resolve_on_unavailable(
        &self,
        per_call: Option<OnUnavailable>,
    ) -> OnUnavailable {
        if let Some(policy) = per_call {
            return policy;
        }
        match self.lookup_scope(&ConfigScope::System).await {
            Ok(CachedScope::Present(config)) => config
                .on_unavailable
                .unwrap_or(self.config.default_on_unavailable),
            _ => self.config.default_on_unavailable,
        }
    }

    /// Evicts exactly the fingerprint of one scope. Mutating CRUD calls
    /// this for each scope they touch; deletes rely on it to drop stale
    /// negative markers as well as stale records.
    pub(crate) fn invalidate_scope(&self, scope: &ConfigScope) {
        self.cache
            .invalidate(&Fingerprint::for_scope(self.opaque_ns(), scope));
    }

    /// Write-through after a successful config mutation, so a read inside
    /// the TTL window is served without a storage round trip.
    pub(crate) fn cache_scope(&self, scope: &ConfigScope, config: ScopeConfig) {
        self.cache.put(
            Fingerprint::for_scope(self.opaque_ns(), scope),
            CachedScope::Present(Arc::new(config)),
        );
    }
}
