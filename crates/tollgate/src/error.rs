use std::time::Duration;
use thiserror::Error;
use tollgate_core::{RateLimitExceeded, ValidationError};
use tollgate_storage::StorageError;

/// Errors returned by the rate limiter.
///
/// Admission denials ([`Error::RateLimitExceeded`]) are business outcomes,
/// not faults; everything else is either a caller bug (validation, unknown
/// entity) or an infrastructure condition the failure-mode gate has already
/// classified.
#[derive(Debug, Error)]
pub enum Error {
    /// The request exceeded one or more limits. Carries every evaluated
    /// status; see [`RateLimitExceeded`].
    #[error(transparent)]
    RateLimitExceeded(#[from] RateLimitExceeded),

    /// Malformed input: bad identifier, unknown limit name in a consume
    /// map, degenerate limit parameters.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The backing store could not be reached (or kept throttling) and the
    /// effective policy is fail-closed.
    #[error("rate limiter unavailable: {source}")]
    Unavailable {
        #[source]
        source: StorageError,
    },

    /// No scope in the resolution chain (nor the caller's fallback)
    /// defines limits for this pair.
    #[error("no limits configured for `{entity_id}`/`{resource}`")]
    NoLimitsConfigured { entity_id: String, resource: String },

    /// An entity was required but has no record.
    #[error("entity `{entity_id}` not found")]
    EntityNotFound { entity_id: String },

    /// `create_entity` found an existing record.
    #[error("entity `{entity_id}` already exists")]
    EntityAlreadyExists { entity_id: String },

    /// The store's schema-version record is incompatible with this client.
    /// Fatal at connect time.
    #[error("storage schema version {found} is incompatible (this client speaks {expected})")]
    SchemaVersion { found: u32, expected: u32 },

    /// A storage error that is neither infrastructure nor conflict
    /// (malformed item, unexpected kind). Indicates data corruption or an
    /// adapter bug.
    #[error("storage error: {0}")]
    Storage(#[source] StorageError),
}

impl Error {
    /// Maps a storage error onto the caller-facing taxonomy.
    ///
    /// Conflicts never reach this point: the admission engine retries them
    /// internally and converts exhaustion into an infrastructure fault
    /// first.
    pub(crate) fn from_storage(source: StorageError) -> Self {
        if source.is_infrastructure() {
            Error::Unavailable { source }
        } else {
            Error::Storage(source)
        }
    }

    /// True when this is an admission denial rather than a fault.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Error::RateLimitExceeded(_))
    }

    /// True when the backing store was unreachable under a fail-closed
    /// policy.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Error::Unavailable { .. })
    }

    /// For denials, how long to wait before the primary violation would
    /// admit the same request.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::RateLimitExceeded(exceeded) => {
                Some(Duration::from_millis(exceeded.retry_after_ms))
            }
            _ => None,
        }
    }
}
