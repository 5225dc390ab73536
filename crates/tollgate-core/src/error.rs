use thiserror::Error;

/// Errors for malformed limits, identifiers, and consume maps.
///
/// Validation errors are surfaced to the caller directly and are never
/// retried; they indicate a bug in the calling code, not a transient
/// condition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A limit was constructed with an empty name.
    #[error("limit name must not be empty")]
    EmptyLimitName,

    /// `capacity` must never exceed `burst`.
    #[error("limit `{name}`: capacity {capacity} exceeds burst {burst}")]
    CapacityExceedsBurst {
        name: String,
        capacity: u64,
        burst: u64,
    },

    /// The refill amount must be positive.
    #[error("limit `{name}`: refill amount must be positive")]
    ZeroRefillAmount { name: String },

    /// The refill period must be positive.
    #[error("limit `{name}`: refill period must be positive")]
    ZeroRefillPeriod { name: String },

    /// Persisted config records carry whole-second refill periods.
    #[error("limit `{name}`: refill period must be a whole number of seconds to be persisted")]
    SubSecondPeriod { name: String },

    /// The consume map names a limit that the resolved configuration does
    /// not define.
    #[error("consume map names unknown limit `{name}`")]
    UnknownConsumeLimit { name: String },

    /// The requested amount can never be admitted because it exceeds the
    /// bucket ceiling.
    #[error("limit `{name}`: requested {requested} exceeds burst {burst}")]
    RequestExceedsBurst {
        name: String,
        requested: u64,
        burst: u64,
    },

    /// An entity id, resource, limit name, or namespace name contains a
    /// character reserved by the key model.
    #[error("invalid identifier `{value}`: {reason}")]
    InvalidIdentifier { value: String, reason: &'static str },

    /// The `_` namespace is reserved for system records.
    #[error("namespace `{name}` is reserved")]
    ReservedNamespace { name: String },
}
