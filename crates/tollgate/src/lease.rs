//! Leases: scoped holders of admitted consumption.
//!
//! A successful acquire returns a [`Lease`] seeded with the consumed
//! amounts. While open, the caller may [`adjust`](Lease::adjust) the
//! consumption in memory (estimate-then-reconcile); a normal exit
//! [`commit`](Lease::commit)s the net adjustments, an abnormal exit
//! [`release`](Lease::release)s the original consumption with compensating
//! writes. Both transitions are one-way and idempotent.
//!
//! A lease dropped without either call is treated as **committed**: the
//! consumption stands and any unapplied adjustments are discarded. The
//! limiter cannot tell a crashed caller from one that deliberately
//! abandoned the handle, and silently refunding tokens on drop would
//! under-count real usage.

use crate::backoff::Backoff;
use crate::config::LimiterConfig;
use crate::error::Error;
use crate::events::AdmissionEvent;
use crate::speculative::SpeculativeCache;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tollgate_core::{LimitStatus, ValidationError};
use tollgate_storage::{BucketWrite, StorageAdapter, StorageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LeaseState {
    Open,
    Committed,
    Released,
}

/// One bucket an open lease holds consumption against: the entity bucket,
/// plus the parent bucket for cascade admissions.
#[derive(Debug, Clone)]
pub(crate) struct LeaseTarget {
    pub(crate) key: String,
    /// Base units consumed at acquire time, per limit name.
    pub(crate) consumed: BTreeMap<String, u64>,
    /// Limit names this bucket tracks; adjustments apply to these only.
    pub(crate) limit_names: BTreeSet<String>,
}

/// A scoped admission handle. See the module docs for lifecycle rules.
#[derive(Debug)]
pub struct Lease<S: StorageAdapter> {
    storage: S,
    config: Arc<LimiterConfig>,
    speculative: SpeculativeCache,
    targets: Vec<LeaseTarget>,
    deltas: BTreeMap<String, i64>,
    statuses: Vec<LimitStatus>,
    state: LeaseState,
    noop: bool,
}

impl<S: StorageAdapter> Lease<S> {
    pub(crate) fn new(
        storage: S,
        config: Arc<LimiterConfig>,
        speculative: SpeculativeCache,
        targets: Vec<LeaseTarget>,
        statuses: Vec<LimitStatus>,
    ) -> Self {
        Self {
            storage,
            config,
            speculative,
            targets,
            deltas: BTreeMap::new(),
            statuses,
            state: LeaseState::Open,
            noop: false,
        }
    }

    /// The lease handed out when the ALLOW policy admits through an
    /// infrastructure failure: every method is a silent no-op.
    pub(crate) fn noop(storage: S, config: Arc<LimiterConfig>, speculative: SpeculativeCache) -> Self {
        Self {
            storage,
            config,
            speculative,
            targets: Vec::new(),
            deltas: BTreeMap::new(),
            statuses: Vec::new(),
            state: LeaseState::Open,
            noop: true,
        }
    }

    /// Per-limit verdicts from the admission that issued this lease.
    /// Empty for a fail-open no-op lease.
    pub fn statuses(&self) -> &[LimitStatus] {
        &self.statuses
    }

    /// True when this lease was issued by the fail-open path and holds no
    /// consumption.
    pub fn is_noop(&self) -> bool {
        self.noop
    }

    /// Records an in-memory adjustment: positive `delta` means "consumed
    /// `delta` more than estimated", negative means less. Multiple calls
    /// combine additively; nothing is written until [`commit`](Lease::commit).
    ///
    /// Fails if `limit_name` is not covered by this lease. A no-op or
    /// terminal lease ignores the call.
    pub fn adjust(&mut self, limit_name: &str, delta: i64) -> Result<(), Error> {
        if self.noop || self.state != LeaseState::Open {
            return Ok(());
        }
        let known = self
            .targets
            .first()
            .map(|t| t.limit_names.contains(limit_name))
            .unwrap_or(false);
        if !known {
            return Err(Error::Validation(ValidationError::UnknownConsumeLimit {
                name: limit_name.to_string(),
            }));
        }
        *self.deltas.entry(limit_name.to_string()).or_insert(0) += delta;
        Ok(())
    }

    /// Applies the net adjustments and closes the lease.
    ///
    /// With zero net deltas this is pure bookkeeping. Otherwise each
    /// involved bucket is re-read and updated under its version tag (both
    /// buckets in one transaction for a cascade lease); lost races retry
    /// with jittered backoff. Adjustments may drive a bucket negative
    /// (debt) but never above its burst ceiling.
    ///
    /// Idempotent: a second call (or a call after `release`) does nothing.
    pub async fn commit(&mut self) -> Result<(), Error> {
        if self.noop || self.state != LeaseState::Open {
            return Ok(());
        }
        let adjusted = self.deltas.values().any(|d| *d != 0);
        if adjusted {
            // Deltas are extra consumption; applying them means taking
            // tokens, hence the sign flip.
            let negated: BTreeMap<String, i64> =
                self.deltas.iter().map(|(k, v)| (k.clone(), -v)).collect();
            self.write_adjustments(&negated).await?;
        }
        self.state = LeaseState::Committed;
        self.config
            .event_listeners
            .emit(&AdmissionEvent::LeaseCommitted { adjusted });
        Ok(())
    }

    /// Issues compensating writes returning the original consumption and
    /// closes the lease.
    ///
    /// Each bucket is compensated independently (not transactionally) and
    /// best-effort: the caller is already handling a failure, so a failed
    /// compensating write is logged and swallowed, never raised.
    ///
    /// Idempotent: a second call (or a call after `commit`) does nothing.
    pub async fn release(&mut self) {
        if self.noop || self.state != LeaseState::Open {
            return;
        }
        let refunds: Vec<(usize, BTreeMap<String, i64>)> = self
            .targets
            .iter()
            .enumerate()
            .map(|(i, target)| {
                let map = target
                    .consumed
                    .iter()
                    .filter(|(_, amount)| **amount > 0)
                    .map(|(name, amount)| (name.clone(), *amount as i64))
                    .collect();
                (i, map)
            })
            .collect();

        let mut restored = true;
        for (index, refund) in refunds {
            if refund.is_empty() {
                continue;
            }
            let key = self.targets[index].key.clone();
            if let Err(_error) = self.adjust_one_bucket(&key, &refund).await {
                restored = false;
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    key = %key,
                    error = %_error,
                    "compensating write failed; consumption leaks"
                );
            }
        }
        self.state = LeaseState::Released;
        self.config
            .event_listeners
            .emit(&AdmissionEvent::LeaseReleased { restored });
    }

    /// Writes `deltas` (already sign-adjusted for the bucket engine) to
    /// every target, transactionally when the lease spans two buckets.
    async fn write_adjustments(&self, deltas: &BTreeMap<String, i64>) -> Result<(), Error> {
        if self.targets.len() <= 1 {
            for target in &self.targets {
                let scoped = Self::scope_deltas(target, deltas);
                if scoped.is_empty() {
                    continue;
                }
                self.adjust_one_bucket(&target.key, &scoped)
                    .await
                    .map_err(Error::from_storage)?;
            }
            return Ok(());
        }

        let backoff = Backoff::new(
            self.config.retry_initial_backoff,
            self.config.retry_max_backoff,
        );
        let keys: Vec<String> = self.targets.iter().map(|t| t.key.clone()).collect();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let read = self
                .storage
                .batch_get_buckets(&keys)
                .await
                .map_err(Error::from_storage)?;
            let mut writes = Vec::new();
            for target in &self.targets {
                let scoped = Self::scope_deltas(target, deltas);
                if scoped.is_empty() {
                    continue;
                }
                // A vanished bucket has nothing to adjust.
                if let Some(stored) = read.buckets.get(&target.key) {
                    let mut state = stored.state.clone();
                    state.adjust(&scoped);
                    writes.push(BucketWrite::Update {
                        key: target.key.clone(),
                        expected_version: stored.version,
                        state,
                    });
                }
            }
            if writes.is_empty() {
                return Ok(());
            }
            match self.storage.transact_update(writes).await {
                Ok(_) => {
                    for key in &keys {
                        self.speculative.remove(key);
                    }
                    return Ok(());
                }
                Err(error) if error.is_conflict() && attempt < self.config.max_write_attempts => {
                    tokio::time::sleep(backoff.delay(attempt)).await;
                }
                Err(error) if error.is_conflict() => {
                    return Err(Error::Unavailable {
                        source: StorageError::infrastructure(format!(
                            "lease write lost {attempt} version races"
                        )),
                    });
                }
                Err(error) => return Err(Error::from_storage(error)),
            }
        }
    }

    /// Read-adjust-write one bucket under its version tag, retrying lost
    /// races.
    async fn adjust_one_bucket(
        &self,
        key: &str,
        deltas: &BTreeMap<String, i64>,
    ) -> Result<(), StorageError> {
        let backoff = Backoff::new(
            self.config.retry_initial_backoff,
            self.config.retry_max_backoff,
        );
        let mut attempt = 0;
        loop {
            attempt += 1;
            let read = self.storage.get_bucket(key).await?;
            let Some(stored) = read.bucket else {
                return Ok(());
            };
            let mut state = stored.state.clone();
            state.adjust(deltas);
            match self
                .storage
                .update_bucket(key, stored.version, &state)
                .await
            {
                Ok(_) => {
                    self.speculative.remove(key);
                    return Ok(());
                }
                Err(error) if error.is_conflict() && attempt < self.config.max_write_attempts => {
                    tokio::time::sleep(backoff.delay(attempt)).await;
                }
                Err(error) if error.is_conflict() => {
                    return Err(StorageError::infrastructure(format!(
                        "lease write lost {attempt} version races"
                    )));
                }
                Err(error) => return Err(error),
            }
        }
    }

    fn scope_deltas(target: &LeaseTarget, deltas: &BTreeMap<String, i64>) -> BTreeMap<String, i64> {
        deltas
            .iter()
            .filter(|(name, delta)| target.limit_names.contains(*name) && **delta != 0)
            .map(|(name, delta)| (name.clone(), *delta))
            .collect()
    }
}

impl<S: StorageAdapter> Drop for Lease<S> {
    fn drop(&mut self) {
        if self.state == LeaseState::Open && !self.noop {
            // Dropped open: consumption stands, pending adjustments are
            // lost. See the module docs.
            #[cfg(feature = "tracing")]
            if self.deltas.values().any(|d| *d != 0) {
                tracing::debug!("lease dropped with unapplied adjustments");
            }
        }
    }
}
