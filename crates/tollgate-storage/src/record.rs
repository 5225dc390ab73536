//! Persisted record shapes.
//!
//! Field names here are wire contract: adapters must preserve them
//! byte-for-byte across versions. Limits persist their refill period in
//! whole seconds; bucket state keeps milliseconds (see
//! [`tollgate_core::LimitState`]).

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tollgate_core::{BucketState, Limit, OnUnavailable, ValidationError};

/// Current on-disk schema version, written under the reserved namespace on
/// first connect and checked on every connect.
pub const SCHEMA_VERSION: u32 = 1;

/// A bucket item as read from storage: state plus its version tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBucket {
    pub state: BucketState,
    pub version: u64,
}

/// Result of a single-bucket read: the item (if present) and the server
/// clock observed in the same response.
#[derive(Debug, Clone)]
pub struct BucketRead {
    pub bucket: Option<StoredBucket>,
    pub server_ms: i64,
}

/// Result of a batched bucket read.
#[derive(Debug, Clone)]
pub struct BatchRead {
    /// Present buckets only; absent keys are simply missing from the map.
    pub buckets: std::collections::HashMap<String, StoredBucket>,
    pub server_ms: i64,
}

/// Acknowledgement of a successful bucket write: the new version tag and
/// the server clock from the same response.
#[derive(Debug, Clone, Copy)]
pub struct WriteAck {
    pub version: u64,
    pub server_ms: i64,
}

/// One item of an atomic multi-item bucket write.
#[derive(Debug, Clone)]
pub enum BucketWrite {
    /// Create, conditioned on the item not existing.
    Create { key: String, state: BucketState },
    /// Replace, conditioned on the current version tag.
    Update {
        key: String,
        expected_version: u64,
        state: BucketState,
    },
}

impl BucketWrite {
    pub fn key(&self) -> &str {
        match self {
            BucketWrite::Create { key, .. } | BucketWrite::Update { key, .. } => key,
        }
    }
}

/// Persisted shape of one limit inside a config record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitSpec {
    pub name: String,
    pub capacity: u64,
    pub burst: u64,
    pub refill_amount: u64,
    pub refill_period_seconds: u64,
}

impl LimitSpec {
    pub fn from_limit(limit: &Limit) -> Result<Self, ValidationError> {
        Ok(Self {
            name: limit.name().to_string(),
            capacity: limit.capacity(),
            burst: limit.burst(),
            refill_amount: limit.refill_amount(),
            refill_period_seconds: limit.refill_period_seconds()?,
        })
    }

    pub fn to_limit(&self) -> Result<Limit, ValidationError> {
        Limit::new(
            self.name.clone(),
            self.capacity,
            self.refill_amount,
            Duration::from_secs(self.refill_period_seconds),
        )?
        .with_burst(self.burst)
    }
}

/// A bound set of limits (and, at system scope, the unavailability policy)
/// stored at one config scope. Writing a record replaces it wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigRecord {
    pub limits: Vec<LimitSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_unavailable: Option<OnUnavailable>,
}

impl ConfigRecord {
    pub fn new(
        limits: &[Limit],
        on_unavailable: Option<OnUnavailable>,
    ) -> Result<Self, ValidationError> {
        Ok(Self {
            limits: limits
                .iter()
                .map(LimitSpec::from_limit)
                .collect::<Result<_, _>>()?,
            on_unavailable,
        })
    }

    pub fn limits(&self) -> Result<Vec<Limit>, ValidationError> {
        self.limits.iter().map(LimitSpec::to_limit).collect()
    }
}

/// An explicitly created entity, optionally attached to a parent for
/// cascading limits. One level only: a parent's own parent is never
/// consulted by admission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub entity_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub created_at_ms: i64,
}

/// Registry entry mapping a human namespace name to its opaque key prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceRecord {
    pub name: String,
    pub opaque_id: String,
}
