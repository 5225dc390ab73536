//! Storage-adapter contract for the tollgate distributed rate limiter.
//!
//! The admission engine needs a narrow surface from its backing store:
//! versioned conditional writes on single items, an atomic multi-item
//! conditional write (two items are enough for one-level cascades), batched
//! reads, and a monotonic server-side clock piggy-backed on every response.
//! This crate defines that surface ([`StorageAdapter`]), the error taxonomy
//! adapters map into ([`StorageError`]), the persisted record shapes
//! ([`ConfigRecord`], [`EntityRecord`], ...), and an in-memory adapter
//! ([`MemoryStore`]) with a manual clock and scripted fault injection for
//! tests and local development.
//!
//! # Clock discipline
//!
//! Refill math never trusts the client's wall clock: every read and write
//! response carries the server's monotonic milliseconds, and that value is
//! the only time source the bucket engine sees. [`MemoryStore`] can run on
//! a manual clock so tests assert retry-after bounds as exact integers.
//!
//! # Examples
//!
//! ```
//! use tollgate_storage::{MemoryStore, StorageAdapter};
//! use tollgate_core::BucketState;
//!
//! # async fn example() -> Result<(), tollgate_storage::StorageError> {
//! let store = MemoryStore::with_manual_clock();
//! let ack = store.put_bucket_new("ns/BUCKET#e#r", &BucketState::default()).await?;
//! let read = store.get_bucket("ns/BUCKET#e#r").await?;
//! assert_eq!(read.bucket.unwrap().version, ack.version);
//! # Ok(())
//! # }
//! ```

mod error;
mod memory;
mod record;

pub use error::StorageError;
pub use memory::MemoryStore;
pub use record::{
    BatchRead, BucketRead, BucketWrite, ConfigRecord, EntityRecord, LimitSpec, NamespaceRecord,
    StoredBucket, WriteAck, SCHEMA_VERSION,
};

use std::future::Future;
use std::time::Duration;
use tollgate_core::BucketState;

/// Maximum number of items one [`StorageAdapter::transact_update`] may
/// carry. Mirrors the transaction cap of DynamoDB-class stores; the
/// admission engine itself never exceeds two.
pub const TRANSACT_MAX_ITEMS: usize = 25;

/// The narrow surface the rate limiter requires from a backing store.
///
/// Implementations map their native failures onto [`StorageError`]'s four
/// kinds and expose the store's monotonic clock in every response. All
/// operations are plain futures: dropping one cancels it, and callers
/// enforce deadlines by wrapping calls in a timeout.
///
/// Adapters are cheap to clone (a handle over a shared connection pool);
/// the limiter and every lease it issues hold a clone.
pub trait StorageAdapter: Clone + Send + Sync + 'static {
    /// Reads one bucket with a projection to bucket attributes only.
    fn get_bucket(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<BucketRead, StorageError>> + Send;

    /// Creates a bucket, conditioned on the item not existing.
    ///
    /// Fails with [`StorageError::AlreadyExists`] when present.
    fn put_bucket_new(
        &self,
        key: &str,
        state: &BucketState,
    ) -> impl Future<Output = Result<WriteAck, StorageError>> + Send;

    /// Replaces a bucket, conditioned on its current version tag.
    ///
    /// Fails with [`StorageError::Conflict`] on mismatch (including a
    /// concurrently deleted item).
    fn update_bucket(
        &self,
        key: &str,
        expected_version: u64,
        state: &BucketState,
    ) -> impl Future<Output = Result<WriteAck, StorageError>> + Send;

    /// Applies up to [`TRANSACT_MAX_ITEMS`] conditional bucket writes
    /// atomically; all-or-nothing.
    ///
    /// Fails with [`StorageError::TransactionConflict`] if any item's
    /// precondition does not hold.
    fn transact_update(
        &self,
        writes: Vec<BucketWrite>,
    ) -> impl Future<Output = Result<i64, StorageError>> + Send;

    /// Reads several buckets in one round trip. Absent keys are omitted
    /// from the result map.
    fn batch_get_buckets(
        &self,
        keys: &[String],
    ) -> impl Future<Output = Result<BatchRead, StorageError>> + Send;

    /// Reads a config record at one scope key.
    fn get_config(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Option<ConfigRecord>, StorageError>> + Send;

    /// Writes a config record, replacing any existing record wholesale.
    fn put_config(
        &self,
        key: &str,
        record: &ConfigRecord,
    ) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Deletes a config record. Returns whether it existed.
    fn delete_config(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<bool, StorageError>> + Send;

    /// Lists config keys under a prefix (e.g. every resource-default in a
    /// namespace).
    fn list_config_keys(
        &self,
        prefix: &str,
    ) -> impl Future<Output = Result<Vec<String>, StorageError>> + Send;

    /// Reads an entity record.
    fn get_entity(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Option<EntityRecord>, StorageError>> + Send;

    /// Creates an entity record; fails with
    /// [`StorageError::AlreadyExists`] when present.
    fn put_entity_new(
        &self,
        key: &str,
        record: &EntityRecord,
    ) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Deletes an entity record. Returns whether it existed.
    fn delete_entity(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<bool, StorageError>> + Send;

    /// Entities under `prefix` whose `parent_id` equals `parent_id`.
    fn list_child_entities(
        &self,
        prefix: &str,
        parent_id: &str,
    ) -> impl Future<Output = Result<Vec<EntityRecord>, StorageError>> + Send;

    /// Reads a namespace-registry record by human name.
    fn get_namespace(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Option<NamespaceRecord>, StorageError>> + Send;

    /// Registers a namespace; fails with [`StorageError::AlreadyExists`]
    /// if the name is taken (the caller then re-reads the winner).
    fn put_namespace_new(
        &self,
        record: &NamespaceRecord,
    ) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Reads the schema-version record under the reserved namespace.
    fn get_schema_version(
        &self,
    ) -> impl Future<Output = Result<Option<u32>, StorageError>> + Send;

    /// Writes the schema-version record; fails with
    /// [`StorageError::AlreadyExists`] if a version is already recorded.
    fn put_schema_version_new(
        &self,
        version: u32,
    ) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// The store's monotonic clock, for callers that need a timestamp
    /// without touching an item.
    fn server_time_ms(&self) -> impl Future<Output = Result<i64, StorageError>> + Send;

    /// Best-effort liveness probe. Never raises.
    fn is_reachable(&self, timeout: Duration) -> impl Future<Output = bool> + Send;
}
