use thiserror::Error;

/// Errors raised by storage adapters.
///
/// The taxonomy is deliberately small: callers branch on *kind*, not on
/// backend detail. Infrastructure faults are the only retryable-by-policy
/// kind; conflicts are retried transparently by the admission engine;
/// everything else surfaces.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// Network failure, throttling, timeout, or server-side 5xx.
    #[error("storage infrastructure fault: {message}")]
    Infrastructure { message: String },

    /// A conditional write's precondition (version tag) did not hold.
    #[error("precondition failed for `{key}`")]
    Conflict { key: String },

    /// A create-only write found the item already present.
    #[error("item already exists: `{key}`")]
    AlreadyExists { key: String },

    /// At least one precondition in an atomic multi-item write failed;
    /// nothing was applied.
    #[error("transaction precondition failed")]
    TransactionConflict,

    /// The requested item does not exist.
    #[error("item not found: `{key}`")]
    NotFound { key: String },

    /// Malformed key or item shape.
    #[error("invalid storage request: {message}")]
    Validation { message: String },
}

impl StorageError {
    pub fn infrastructure(message: impl Into<String>) -> Self {
        StorageError::Infrastructure {
            message: message.into(),
        }
    }

    /// True for faults of the backing infrastructure, where the
    /// fail-open/fail-closed policy applies.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, StorageError::Infrastructure { .. })
    }

    /// True for optimistic-concurrency losses that the caller should
    /// re-read and retry.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StorageError::Conflict { .. } | StorageError::TransactionConflict
        )
    }
}
