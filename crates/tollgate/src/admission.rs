//! The admission engine.
//!
//! `acquire` resolves effective limits, plans the buckets to touch (the
//! entity bucket, plus its parent for cascades), and consumes tokens under
//! optimistic concurrency:
//!
//! - **Fast path** (single bucket only): a conditional write built from the
//!   last-seen state and version, skipping the read round trip. Any doubt
//!   (version race, uncovered limit, a check that would need refill credit
//!   to pass) falls back to the slow path.
//! - **Slow path**: read, run the bucket engine, write under the version
//!   tag; lost races retry with jittered backoff. Cascade writes go through
//!   one atomic transaction so parent and child move together or not at
//!   all.
//!
//! Rejections carry every evaluated status from every involved bucket.

use crate::backoff::Backoff;
use crate::error::Error;
use crate::events::AdmissionEvent;
use crate::lease::{Lease, LeaseTarget};
use crate::RateLimiter;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;
use tollgate_core::{
    entity_key, validate_identifier, BucketKey, BucketState, ConsumeMap, Limit, LimitStatus,
    OnUnavailable, RateLimitExceeded, ValidationError,
};
use tollgate_storage::{BucketWrite, StorageAdapter, StorageError, StoredBucket};

/// Parameters of one admission attempt.
///
/// Built inline with chained setters:
///
/// ```
/// use tollgate::AcquireRequest;
///
/// let request = AcquireRequest::new("acct-1", "gpt-4")
///     .consume("rpm", 1)
///     .consume("tpm", 450)
///     .cascade();
/// ```
#[derive(Debug, Clone)]
pub struct AcquireRequest {
    pub(crate) entity_id: String,
    pub(crate) resource: String,
    pub(crate) consume: ConsumeMap,
    pub(crate) limits: Option<Vec<Limit>>,
    pub(crate) cascade: bool,
    pub(crate) on_unavailable: Option<OnUnavailable>,
    pub(crate) fast_path: bool,
}

impl AcquireRequest {
    pub fn new(entity_id: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            resource: resource.into(),
            consume: ConsumeMap::new(),
            limits: None,
            cascade: false,
            on_unavailable: None,
            fast_path: true,
        }
    }

    /// Adds `amount` base units against `limit_name`. Repeated names
    /// accumulate.
    pub fn consume(mut self, limit_name: impl Into<String>, amount: u64) -> Self {
        *self.consume.entry(limit_name.into()).or_insert(0) += amount;
        self
    }

    /// In-memory fallback limits, used only when no stored config scope
    /// matches. Stored records always win.
    pub fn fallback_limits(mut self, limits: Vec<Limit>) -> Self {
        self.limits = Some(limits);
        self
    }

    /// Also checks and consumes the entity's parent bucket, atomically.
    /// An entity without a parent behaves as if this was never set.
    pub fn cascade(mut self) -> Self {
        self.cascade = true;
        self
    }

    /// Overrides the fail-open/fail-closed policy for this call only.
    pub fn on_unavailable(mut self, policy: OnUnavailable) -> Self {
        self.on_unavailable = Some(policy);
        self
    }

    /// Opts this call out of the speculative write path.
    pub fn skip_fast_path(mut self) -> Self {
        self.fast_path = false;
        self
    }
}

/// One bucket the plan will check and consume.
struct PlanTarget {
    key: String,
    entity_id: String,
    resource: String,
    limits: Vec<Limit>,
    consume: ConsumeMap,
}

impl PlanTarget {
    fn lease_target(&self) -> LeaseTarget {
        LeaseTarget {
            key: self.key.clone(),
            consumed: self.consume.clone(),
            limit_names: self.limits.iter().map(|l| l.name().to_string()).collect::<BTreeSet<_>>(),
        }
    }
}

impl<S: StorageAdapter> RateLimiter<S> {
    /// Checks all effective limits for the pair, consumes tokens, and
    /// returns a [`Lease`].
    ///
    /// Denials surface as [`Error::RateLimitExceeded`] carrying every
    /// evaluated status. Infrastructure faults go through the failure-mode
    /// gate: the effective `on_unavailable` policy either re-raises them as
    /// [`Error::Unavailable`] (BLOCK) or swallows them into a no-op lease
    /// (ALLOW).
    pub async fn acquire(&self, request: AcquireRequest) -> Result<Lease<S>, Error> {
        validate_identifier(&request.entity_id)?;
        validate_identifier(&request.resource)?;

        match self.try_acquire(&request).await {
            Ok(lease) => Ok(lease),
            Err(Error::Unavailable { source }) => {
                // The gate: policy resolution is itself best-effort and
                // collapses to the constructor default when storage is
                // down.
                let policy = self.resolve_on_unavailable(request.on_unavailable).await;
                match policy {
                    OnUnavailable::Allow => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(
                            limiter = %self.config.name,
                            entity_id = %request.entity_id,
                            resource = %request.resource,
                            error = %source,
                            "storage unavailable; failing open"
                        );
                        #[cfg(feature = "metrics")]
                        metrics::counter!("tollgate_admissions_total", "limiter" => self.config.name.clone(), "result" => "fail_open").increment(1);
                        self.config.event_listeners.emit(&AdmissionEvent::FailedOpen {
                            entity_id: request.entity_id.clone(),
                            resource: request.resource.clone(),
                        });
                        Ok(Lease::noop(
                            self.storage.clone(),
                            self.config.clone(),
                            self.speculative.clone(),
                        ))
                    }
                    OnUnavailable::Block => {
                        #[cfg(feature = "metrics")]
                        metrics::counter!("tollgate_admissions_total", "limiter" => self.config.name.clone(), "result" => "fail_closed").increment(1);
                        self.config
                            .event_listeners
                            .emit(&AdmissionEvent::FailedClosed {
                                entity_id: request.entity_id.clone(),
                                resource: request.resource.clone(),
                            });
                        Err(Error::Unavailable { source })
                    }
                }
            }
            Err(other) => Err(other),
        }
    }

    async fn try_acquire(&self, request: &AcquireRequest) -> Result<Lease<S>, Error> {
        let limits = self
            .resolve_limits(
                &request.entity_id,
                &request.resource,
                request.limits.as_deref(),
            )
            .await?;
        validate_consume(&limits, &request.consume, true)?;

        let mut targets = vec![PlanTarget {
            key: BucketKey::new(self.opaque_ns(), &request.entity_id, &request.resource).encode(),
            entity_id: request.entity_id.clone(),
            resource: request.resource.clone(),
            limits,
            consume: request.consume.clone(),
        }];

        if request.cascade {
            if let Some(parent_id) = self.parent_of(&request.entity_id).await? {
                match self.resolve_limits(&parent_id, &request.resource, None).await {
                    Ok(parent_limits) => {
                        let parent_consume: ConsumeMap = request
                            .consume
                            .iter()
                            .filter(|(name, _)| {
                                parent_limits.iter().any(|l| l.name() == name.as_str())
                            })
                            .map(|(name, amount)| (name.clone(), *amount))
                            .collect();
                        validate_consume(&parent_limits, &parent_consume, false)?;
                        targets.push(PlanTarget {
                            key: BucketKey::new(self.opaque_ns(), &parent_id, &request.resource)
                                .encode(),
                            entity_id: parent_id,
                            resource: request.resource.clone(),
                            limits: parent_limits,
                            consume: parent_consume,
                        });
                    }
                    // A parent with no configured limits imposes nothing.
                    Err(Error::NoLimitsConfigured { .. }) => {}
                    Err(other) => return Err(other),
                }
            }
        }

        if targets.len() == 1 && self.config.speculative_writes && request.fast_path {
            if let Some(lease) = self.try_fast_path(&targets[0]).await? {
                return Ok(lease);
            }
        }

        self.slow_path(request, &targets).await
    }

    /// Speculative write from cached state, skipping the read round trip.
    ///
    /// Returns `Ok(None)` whenever the cache cannot prove admission: no
    /// entry, an entry missing one of the resolved limits, a check that
    /// fails without fresh refill credit, or a lost version race.
    async fn try_fast_path(&self, target: &PlanTarget) -> Result<Option<Lease<S>>, Error> {
        let Some(cached) = self.speculative.get(&target.key) else {
            return Ok(None);
        };
        if !cached.state.covers(&target.limits) {
            return Ok(None);
        }
        // Check at the cached server time: no refill credit is granted, so
        // a pass here is a pass under any fresher clock. The written state
        // keeps the old `last_refill_server_ms`, preserving the pending
        // credit for the next read-modify-write.
        let outcome = cached.state.check_and_consume(
            &target.limits,
            &target.consume,
            cached.server_ms,
            &target.entity_id,
            &target.resource,
        );
        if !outcome.admitted {
            return Ok(None);
        }

        match self
            .with_timeout(
                self.storage
                    .update_bucket(&target.key, cached.version, &outcome.state),
            )
            .await
        {
            Ok(ack) => {
                self.speculative.insert(
                    target.key.clone(),
                    ack.version,
                    outcome.state.clone(),
                    ack.server_ms,
                );
                #[cfg(feature = "metrics")]
                metrics::counter!("tollgate_fast_path_total", "result" => "hit").increment(1);
                self.emit_admitted(target, false, true, 1);
                Ok(Some(Lease::new(
                    self.storage.clone(),
                    self.config.clone(),
                    self.speculative.clone(),
                    vec![target.lease_target()],
                    outcome.statuses,
                )))
            }
            Err(error) if error.is_conflict() => {
                self.speculative.remove(&target.key);
                #[cfg(feature = "metrics")]
                metrics::counter!("tollgate_fast_path_total", "result" => "conflict").increment(1);
                Ok(None)
            }
            Err(error) => Err(Error::from_storage(error)),
        }
    }

    /// Read, evaluate, and conditionally write every planned bucket,
    /// retrying lost version races.
    async fn slow_path(
        &self,
        request: &AcquireRequest,
        targets: &[PlanTarget],
    ) -> Result<Lease<S>, Error> {
        let backoff = Backoff::new(
            self.config.retry_initial_backoff,
            self.config.retry_max_backoff,
        );
        let keys: Vec<String> = targets.iter().map(|t| t.key.clone()).collect();
        let mut attempt = 0;
        loop {
            attempt += 1;

            let (reads, server_ms) = self.read_targets(&keys).await?;

            let mut all_statuses = Vec::new();
            let mut admitted = true;
            let mut new_states = Vec::with_capacity(targets.len());
            for target in targets {
                let stored = reads.get(&target.key);
                let prior = stored.map(|b| b.state.clone()).unwrap_or_default();
                let outcome = prior.check_and_consume(
                    &target.limits,
                    &target.consume,
                    server_ms,
                    &target.entity_id,
                    &target.resource,
                );
                admitted &= outcome.admitted;
                all_statuses.extend(outcome.statuses);
                new_states.push((target, stored.map(|b| b.version), outcome.state));
            }

            if !admitted {
                let exceeded = RateLimitExceeded::from_statuses(
                    request.entity_id.clone(),
                    request.resource.clone(),
                    all_statuses,
                );
                #[cfg(feature = "tracing")]
                tracing::debug!(
                    limiter = %self.config.name,
                    entity_id = %request.entity_id,
                    resource = %request.resource,
                    retry_after_ms = exceeded.retry_after_ms,
                    "admission rejected"
                );
                #[cfg(feature = "metrics")]
                metrics::counter!("tollgate_admissions_total", "limiter" => self.config.name.clone(), "result" => "rejected").increment(1);
                self.config.event_listeners.emit(&AdmissionEvent::Rejected {
                    entity_id: request.entity_id.clone(),
                    resource: request.resource.clone(),
                    retry_after_ms: exceeded.retry_after_ms,
                });
                return Err(exceeded.into());
            }

            match self.write_targets(&new_states).await {
                Ok(()) => {
                    let target = &targets[0];
                    self.emit_admitted(target, request.cascade, false, attempt);
                    #[cfg(feature = "metrics")]
                    metrics::histogram!("tollgate_admission_attempts", "limiter" => self.config.name.clone()).record(attempt as f64);
                    return Ok(Lease::new(
                        self.storage.clone(),
                        self.config.clone(),
                        self.speculative.clone(),
                        targets.iter().map(|t| t.lease_target()).collect(),
                        all_statuses,
                    ));
                }
                Err(WriteLoss::Retryable) if attempt < self.config.max_write_attempts => {
                    let delay = backoff.delay(attempt);
                    #[cfg(feature = "metrics")]
                    metrics::counter!("tollgate_conflict_retries_total", "limiter" => self.config.name.clone()).increment(1);
                    self.config
                        .event_listeners
                        .emit(&AdmissionEvent::ConflictRetry {
                            entity_id: request.entity_id.clone(),
                            resource: request.resource.clone(),
                            attempt,
                            delay,
                        });
                    tokio::time::sleep(delay).await;
                }
                Err(WriteLoss::Retryable) => {
                    return Err(Error::Unavailable {
                        source: StorageError::infrastructure(format!(
                            "admission write lost {attempt} version races"
                        )),
                    });
                }
                Err(WriteLoss::Fatal(error)) => return Err(Error::from_storage(error)),
            }
        }
    }

    async fn read_targets(
        &self,
        keys: &[String],
    ) -> Result<(HashMap<String, StoredBucket>, i64), Error> {
        if keys.len() == 1 {
            let read = self
                .with_timeout(self.storage.get_bucket(&keys[0]))
                .await
                .map_err(Error::from_storage)?;
            let mut map = HashMap::new();
            if let Some(bucket) = read.bucket {
                map.insert(keys[0].clone(), bucket);
            }
            Ok((map, read.server_ms))
        } else {
            let read = self
                .with_timeout(self.storage.batch_get_buckets(keys))
                .await
                .map_err(Error::from_storage)?;
            Ok((read.buckets, read.server_ms))
        }
    }

    async fn write_targets(
        &self,
        new_states: &[(&PlanTarget, Option<u64>, BucketState)],
    ) -> Result<(), WriteLoss> {
        if new_states.len() == 1 {
            let (target, version, state) = &new_states[0];
            let write = match version {
                Some(v) => {
                    self.with_timeout(self.storage.update_bucket(&target.key, *v, state))
                        .await
                }
                None => {
                    self.with_timeout(self.storage.put_bucket_new(&target.key, state))
                        .await
                }
            };
            match write {
                Ok(ack) => {
                    self.speculative.insert(
                        target.key.clone(),
                        ack.version,
                        state.clone(),
                        ack.server_ms,
                    );
                    Ok(())
                }
                Err(error)
                    if error.is_conflict()
                        || matches!(error, StorageError::AlreadyExists { .. }) =>
                {
                    self.speculative.remove(&target.key);
                    Err(WriteLoss::Retryable)
                }
                Err(error) => Err(WriteLoss::Fatal(error)),
            }
        } else {
            let writes = new_states
                .iter()
                .map(|(target, version, state)| match version {
                    Some(v) => BucketWrite::Update {
                        key: target.key.clone(),
                        expected_version: *v,
                        state: state.clone(),
                    },
                    None => BucketWrite::Create {
                        key: target.key.clone(),
                        state: state.clone(),
                    },
                })
                .collect();
            match self.with_timeout(self.storage.transact_update(writes)).await {
                Ok(_server_ms) => {
                    // The transaction response carries no fresh version
                    // tags; drop stale entries rather than guess.
                    for (target, _, _) in new_states {
                        self.speculative.remove(&target.key);
                    }
                    Ok(())
                }
                Err(error) if error.is_conflict() => {
                    for (target, _, _) in new_states {
                        self.speculative.remove(&target.key);
                    }
                    Err(WriteLoss::Retryable)
                }
                Err(error) => Err(WriteLoss::Fatal(error)),
            }
        }
    }

    fn emit_admitted(&self, target: &PlanTarget, cascade: bool, fast_path: bool, attempts: usize) {
        #[cfg(feature = "tracing")]
        tracing::debug!(
            limiter = %self.config.name,
            entity_id = %target.entity_id,
            resource = %target.resource,
            fast_path,
            attempts,
            "admission granted"
        );
        #[cfg(feature = "metrics")]
        metrics::counter!("tollgate_admissions_total", "limiter" => self.config.name.clone(), "result" => "admitted").increment(1);
        self.config.event_listeners.emit(&AdmissionEvent::Admitted {
            entity_id: target.entity_id.clone(),
            resource: target.resource.clone(),
            cascade,
            fast_path,
            attempts,
        });
    }

    /// The entity's parent id, if the entity has a record naming one.
    /// Unregistered entities simply have no parent.
    async fn parent_of(&self, entity_id: &str) -> Result<Option<String>, Error> {
        let key = entity_key(self.opaque_ns(), entity_id);
        let record = self
            .with_timeout(self.storage.get_entity(&key))
            .await
            .map_err(Error::from_storage)?;
        Ok(record.and_then(|r| r.parent_id))
    }

    /// Current per-limit availability, in base units. Read-only.
    ///
    /// Under an ALLOW policy with storage down this fails open to an empty
    /// map.
    pub async fn available(
        &self,
        entity_id: &str,
        resource: &str,
    ) -> Result<BTreeMap<String, i64>, Error> {
        match self.read_statuses(entity_id, resource, &ConsumeMap::new()).await {
            Ok(statuses) => Ok(statuses
                .into_iter()
                .map(|s| (s.limit_name, s.available))
                .collect()),
            Err(error) => self.fail_open_read(error, BTreeMap::new).await,
        }
    }

    /// Per-limit verdicts for a hypothetical zero-consume check. Read-only.
    pub async fn get_status(
        &self,
        entity_id: &str,
        resource: &str,
    ) -> Result<Vec<LimitStatus>, Error> {
        match self.read_statuses(entity_id, resource, &ConsumeMap::new()).await {
            Ok(statuses) => Ok(statuses),
            Err(error) => self.fail_open_read(error, Vec::new).await,
        }
    }

    /// Time until `needed` could be admitted, assuming no other writers.
    /// Zero when it would be admitted now. Read-only.
    pub async fn time_until_available(
        &self,
        entity_id: &str,
        resource: &str,
        needed: &ConsumeMap,
    ) -> Result<Duration, Error> {
        match self.read_statuses(entity_id, resource, needed).await {
            Ok(statuses) => {
                let worst = statuses
                    .iter()
                    .filter(|s| s.exceeded)
                    .map(|s| s.retry_after_ms)
                    .max()
                    .unwrap_or(0);
                Ok(Duration::from_millis(worst))
            }
            Err(error) => self.fail_open_read(error, || Duration::ZERO).await,
        }
    }

    async fn read_statuses(
        &self,
        entity_id: &str,
        resource: &str,
        consume: &ConsumeMap,
    ) -> Result<Vec<LimitStatus>, Error> {
        validate_identifier(entity_id)?;
        validate_identifier(resource)?;
        let limits = self.resolve_limits(entity_id, resource, None).await?;
        validate_consume(&limits, consume, true)?;

        let key = BucketKey::new(self.opaque_ns(), entity_id, resource).encode();
        let read = self
            .with_timeout(self.storage.get_bucket(&key))
            .await
            .map_err(Error::from_storage)?;
        let prior = read.bucket.map(|b| b.state).unwrap_or_default();
        let outcome = prior.check_and_consume(&limits, consume, read.server_ms, entity_id, resource);
        Ok(outcome.statuses)
    }

    /// Gate for read-only operations: ALLOW turns an infrastructure fault
    /// into the given fail-open value, BLOCK re-raises it.
    async fn fail_open_read<T>(
        &self,
        error: Error,
        fallback: impl FnOnce() -> T,
    ) -> Result<T, Error> {
        match error {
            Error::Unavailable { source } => {
                match self.resolve_on_unavailable(None).await {
                    OnUnavailable::Allow => Ok(fallback()),
                    OnUnavailable::Block => Err(Error::Unavailable { source }),
                }
            }
            other => Err(other),
        }
    }
}

/// Checks a consume map against a resolved limit set.
///
/// With `strict` set, every consume entry must name a limit in the set
/// (the rule for the addressed bucket); a cascade's parent map was already
/// filtered to the intersection, so it only checks amounts. An amount
/// beyond a limit's burst could never be admitted and is rejected here
/// rather than surfacing as an unsatisfiable retry-after.
fn validate_consume(
    limits: &[Limit],
    consume: &ConsumeMap,
    strict: bool,
) -> Result<(), ValidationError> {
    for (name, amount) in consume {
        let Some(limit) = limits.iter().find(|l| l.name() == name.as_str()) else {
            if strict {
                return Err(ValidationError::UnknownConsumeLimit { name: name.clone() });
            }
            continue;
        };
        if *amount > limit.burst() {
            return Err(ValidationError::RequestExceedsBurst {
                name: name.clone(),
                requested: *amount,
                burst: limit.burst(),
            });
        }
    }
    Ok(())
}

enum WriteLoss {
    /// A version race or create collision: re-read and retry.
    Retryable,
    /// Anything else: surface through the error taxonomy.
    Fatal(StorageError),
}
