use serde::Serialize;
use thiserror::Error;

/// Per-limit verdict from one admission check.
///
/// Serialization uses stable field names so the struct can be embedded in
/// HTTP error bodies unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LimitStatus {
    pub entity_id: String,
    pub resource: String,
    pub limit_name: String,
    pub capacity: u64,
    pub burst: u64,
    /// Post-refill balance in whole base units; negative when in debt.
    pub available: i64,
    pub requested: u64,
    pub exceeded: bool,
    /// Time until this limit alone could admit the request; zero when it
    /// passed.
    pub retry_after_ms: u64,
}

/// Rejection payload for an admission that exceeded one or more limits.
///
/// Carries every evaluated [`LimitStatus`] (passing and failing, across
/// all buckets involved in the check) so callers see the full picture.
/// `retry_after_ms` is the largest retry-after among the violations (the
/// primary violation): retrying sooner is guaranteed to fail on at least
/// one limit.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("rate limit exceeded for {entity_id}/{resource}: retry after {retry_after_ms}ms")]
pub struct RateLimitExceeded {
    pub entity_id: String,
    pub resource: String,
    pub statuses: Vec<LimitStatus>,
    pub retry_after_ms: u64,
}

impl RateLimitExceeded {
    /// Builds the rejection from the statuses of every bucket evaluated.
    ///
    /// `entity_id`/`resource` name the bucket the caller addressed, which
    /// in a cascade is the child.
    pub fn from_statuses(
        entity_id: impl Into<String>,
        resource: impl Into<String>,
        statuses: Vec<LimitStatus>,
    ) -> Self {
        let retry_after_ms = statuses
            .iter()
            .filter(|s| s.exceeded)
            .map(|s| s.retry_after_ms)
            .max()
            .unwrap_or(0);
        Self {
            entity_id: entity_id.into(),
            resource: resource.into(),
            statuses,
            retry_after_ms,
        }
    }

    /// The violated statuses only.
    pub fn violations(&self) -> impl Iterator<Item = &LimitStatus> {
        self.statuses.iter().filter(|s| s.exceeded)
    }

    /// The violation with the largest retry-after.
    pub fn primary_violation(&self) -> Option<&LimitStatus> {
        self.violations().max_by_key(|s| s.retry_after_ms)
    }
}
