//! Pure building blocks for the tollgate distributed rate limiter.
//!
//! This crate holds everything that needs no I/O:
//!
//! - **Limits**: named token-bucket rules with capacity, burst, and refill
//!   rate ([`Limit`]), plus per-second/minute/hour/day factories
//! - **Bucket engine**: drift-compensated integer token-bucket math over
//!   server-side timestamps ([`BucketState`], [`LimitState`])
//! - **Key model**: stable storage keys for buckets, config records,
//!   entities, and the reserved system namespace ([`BucketKey`],
//!   [`ConfigScope`])
//! - **Fingerprints**: stable config-cache keys ([`Fingerprint`])
//! - **Statuses**: per-limit admission verdicts ([`LimitStatus`]) and the
//!   serializable rejection payload ([`RateLimitExceeded`])
//!
//! All token arithmetic is on 64-bit signed integers with tokens scaled by
//! 1000 (milli-tokens), so repeated refills over arbitrary partitions of a
//! time interval produce identical balances. Floating point never touches
//! bucket state.
//!
//! # Examples
//!
//! ```
//! use tollgate_core::{BucketState, ConsumeMap, Limit};
//!
//! let limits = vec![Limit::per_minute("rpm", 10).unwrap()];
//! let mut consume = ConsumeMap::new();
//! consume.insert("rpm".to_string(), 3);
//!
//! let outcome = BucketState::default().check_and_consume(
//!     &limits,
//!     &consume,
//!     1_000, // server clock, ms
//!     "acct-1",
//!     "search",
//! );
//! assert!(outcome.admitted);
//! assert_eq!(outcome.state.tokens_base("rpm"), Some(7));
//! ```

mod bucket;
mod error;
mod fingerprint;
mod key;
mod limit;
mod status;

pub use bucket::{BucketState, CheckOutcome, ConsumeMap, LimitState, MILLI};
pub use error::ValidationError;
pub use fingerprint::Fingerprint;
pub use key::{
    entity_key, namespace_registry_key, resource_defaults_prefix, schema_version_key,
    validate_identifier, BucketKey, ConfigScope, ScopeKind, RESERVED_NAMESPACE,
};
pub use limit::{Limit, OnUnavailable};
pub use status::{LimitStatus, RateLimitExceeded};
