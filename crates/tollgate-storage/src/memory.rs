//! In-memory storage adapter.
//!
//! Backs tests, examples, and local development with the same conditional
//! semantics a DynamoDB-class store provides: per-item version tags,
//! create-only puts, atomic multi-item writes, and a monotonic server
//! clock. Faults can be scripted (fail the next N calls, or all calls) to
//! exercise retry and fail-open paths without a real backend.

use crate::error::StorageError;
use crate::record::{
    BatchRead, BucketRead, BucketWrite, ConfigRecord, EntityRecord, NamespaceRecord, StoredBucket,
    WriteAck,
};
use crate::{StorageAdapter, TRANSACT_MAX_ITEMS};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tollgate_core::BucketState;

#[derive(Debug, Clone)]
enum Value {
    Bucket(BucketState),
    Config(ConfigRecord),
    Entity(EntityRecord),
    Namespace(NamespaceRecord),
    Schema(u32),
}

#[derive(Debug, Clone)]
struct Item {
    version: u64,
    value: Value,
}

#[derive(Debug, Default)]
struct Faults {
    fail_remaining: u32,
    fail_all: bool,
    conflict_remaining: u32,
}

#[derive(Debug)]
struct Clock {
    start: Instant,
    offset_ms: AtomicI64,
    manual: bool,
}

impl Clock {
    fn now_ms(&self) -> i64 {
        let offset = self.offset_ms.load(Ordering::SeqCst);
        if self.manual {
            offset
        } else {
            self.start.elapsed().as_millis() as i64 + offset
        }
    }
}

#[derive(Debug)]
struct Inner {
    items: Mutex<BTreeMap<String, Item>>,
    faults: Mutex<Faults>,
    clock: Clock,
}

/// In-memory [`StorageAdapter`] with scripted faults and a controllable
/// server clock.
///
/// Cloning yields another handle to the same store, so a limiter, its
/// leases, and a test can all observe one set of items.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// A store whose server clock follows real (monotonic) time.
    pub fn new() -> Self {
        Self::build(false)
    }

    /// A store whose server clock only moves via
    /// [`advance`](MemoryStore::advance). Starts at zero.
    pub fn with_manual_clock() -> Self {
        Self::build(true)
    }

    fn build(manual: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                items: Mutex::new(BTreeMap::new()),
                faults: Mutex::new(Faults::default()),
                clock: Clock {
                    start: Instant::now(),
                    offset_ms: AtomicI64::new(0),
                    manual,
                },
            }),
        }
    }

    /// Moves the server clock forward.
    pub fn advance(&self, by: Duration) {
        self.inner
            .clock
            .offset_ms
            .fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }

    /// The server clock as of now, without going through an operation.
    pub fn now_ms(&self) -> i64 {
        self.inner.clock.now_ms()
    }

    /// Makes the next `n` operations fail with an infrastructure error.
    pub fn fail_next(&self, n: u32) {
        self.inner.faults.lock().unwrap().fail_remaining = n;
    }

    /// Makes every operation fail with an infrastructure error until
    /// disabled. Also flips [`is_reachable`](StorageAdapter::is_reachable)
    /// to false.
    pub fn fail_all(&self, enabled: bool) {
        self.inner.faults.lock().unwrap().fail_all = enabled;
    }

    /// Makes the next `n` conditional bucket writes lose their version
    /// race, as if a competing client committed first. Models an
    /// adversarial scheduler preempting between read and write.
    pub fn conflict_next(&self, n: u32) {
        self.inner.faults.lock().unwrap().conflict_remaining = n;
    }

    fn check_injected_conflict(&self, key: &str) -> Result<(), StorageError> {
        let mut faults = self.inner.faults.lock().unwrap();
        if faults.conflict_remaining > 0 {
            faults.conflict_remaining -= 1;
            return Err(StorageError::Conflict {
                key: key.to_string(),
            });
        }
        Ok(())
    }

    /// Number of items currently stored, for test assertions.
    pub fn item_count(&self) -> usize {
        self.inner.items.lock().unwrap().len()
    }

    fn check_fault(&self, op: &'static str) -> Result<(), StorageError> {
        let mut faults = self.inner.faults.lock().unwrap();
        if faults.fail_all {
            return Err(StorageError::infrastructure(format!(
                "injected fault in {op}"
            )));
        }
        if faults.fail_remaining > 0 {
            faults.fail_remaining -= 1;
            #[cfg(feature = "tracing")]
            tracing::debug!(op, "memory store injecting fault");
            return Err(StorageError::infrastructure(format!(
                "injected fault in {op}"
            )));
        }
        Ok(())
    }

    fn get_typed<T>(
        &self,
        op: &'static str,
        key: &str,
        extract: impl Fn(&Value) -> Option<T>,
    ) -> Result<Option<T>, StorageError> {
        self.check_fault(op)?;
        let items = self.inner.items.lock().unwrap();
        match items.get(key) {
            None => Ok(None),
            Some(item) => match extract(&item.value) {
                Some(value) => Ok(Some(value)),
                None => Err(StorageError::Validation {
                    message: format!("item `{key}` has unexpected kind"),
                }),
            },
        }
    }

    fn put_new(
        &self,
        op: &'static str,
        key: &str,
        value: Value,
    ) -> Result<u64, StorageError> {
        self.check_fault(op)?;
        let mut items = self.inner.items.lock().unwrap();
        if items.contains_key(key) {
            return Err(StorageError::AlreadyExists {
                key: key.to_string(),
            });
        }
        items.insert(key.to_string(), Item { version: 1, value });
        Ok(1)
    }

    fn delete(&self, op: &'static str, key: &str) -> Result<bool, StorageError> {
        self.check_fault(op)?;
        Ok(self.inner.items.lock().unwrap().remove(key).is_some())
    }
}

impl StorageAdapter for MemoryStore {
    async fn get_bucket(&self, key: &str) -> Result<BucketRead, StorageError> {
        self.check_fault("get_bucket")?;
        let items = self.inner.items.lock().unwrap();
        let bucket = match items.get(key) {
            None => None,
            Some(Item {
                version,
                value: Value::Bucket(state),
            }) => Some(StoredBucket {
                state: state.clone(),
                version: *version,
            }),
            Some(_) => {
                return Err(StorageError::Validation {
                    message: format!("item `{key}` is not a bucket"),
                })
            }
        };
        Ok(BucketRead {
            bucket,
            server_ms: self.inner.clock.now_ms(),
        })
    }

    async fn put_bucket_new(
        &self,
        key: &str,
        state: &BucketState,
    ) -> Result<WriteAck, StorageError> {
        let version = self.put_new("put_bucket_new", key, Value::Bucket(state.clone()))?;
        Ok(WriteAck {
            version,
            server_ms: self.inner.clock.now_ms(),
        })
    }

    async fn update_bucket(
        &self,
        key: &str,
        expected_version: u64,
        state: &BucketState,
    ) -> Result<WriteAck, StorageError> {
        self.check_fault("update_bucket")?;
        self.check_injected_conflict(key)?;
        let mut items = self.inner.items.lock().unwrap();
        let item = items.get_mut(key).ok_or_else(|| StorageError::Conflict {
            key: key.to_string(),
        })?;
        if item.version != expected_version {
            #[cfg(feature = "tracing")]
            tracing::debug!(
                key,
                expected = expected_version,
                actual = item.version,
                "conditional write lost"
            );
            return Err(StorageError::Conflict {
                key: key.to_string(),
            });
        }
        item.version += 1;
        item.value = Value::Bucket(state.clone());
        Ok(WriteAck {
            version: item.version,
            server_ms: self.inner.clock.now_ms(),
        })
    }

    async fn transact_update(&self, writes: Vec<BucketWrite>) -> Result<i64, StorageError> {
        self.check_fault("transact_update")?;
        if let Some(write) = writes.first() {
            if self.check_injected_conflict(write.key()).is_err() {
                return Err(StorageError::TransactionConflict);
            }
        }
        if writes.is_empty() || writes.len() > TRANSACT_MAX_ITEMS {
            return Err(StorageError::Validation {
                message: format!(
                    "transaction must carry between 1 and {TRANSACT_MAX_ITEMS} items, got {}",
                    writes.len()
                ),
            });
        }
        let mut seen = HashSet::new();
        for write in &writes {
            if !seen.insert(write.key().to_string()) {
                return Err(StorageError::Validation {
                    message: format!("duplicate key `{}` in transaction", write.key()),
                });
            }
        }

        let mut items = self.inner.items.lock().unwrap();
        // Validate every precondition before applying anything.
        for write in &writes {
            match write {
                BucketWrite::Create { key, .. } => {
                    if items.contains_key(key) {
                        return Err(StorageError::TransactionConflict);
                    }
                }
                BucketWrite::Update {
                    key,
                    expected_version,
                    ..
                } => match items.get(key) {
                    Some(item) if item.version == *expected_version => {}
                    _ => return Err(StorageError::TransactionConflict),
                },
            }
        }
        for write in writes {
            match write {
                BucketWrite::Create { key, state } => {
                    items.insert(
                        key,
                        Item {
                            version: 1,
                            value: Value::Bucket(state),
                        },
                    );
                }
                BucketWrite::Update { key, state, .. } => {
                    let item = items.get_mut(&key).expect("validated above");
                    item.version += 1;
                    item.value = Value::Bucket(state);
                }
            }
        }
        Ok(self.inner.clock.now_ms())
    }

    async fn batch_get_buckets(&self, keys: &[String]) -> Result<BatchRead, StorageError> {
        self.check_fault("batch_get_buckets")?;
        let items = self.inner.items.lock().unwrap();
        let mut buckets = HashMap::new();
        for key in keys {
            if let Some(Item {
                version,
                value: Value::Bucket(state),
            }) = items.get(key)
            {
                buckets.insert(
                    key.clone(),
                    StoredBucket {
                        state: state.clone(),
                        version: *version,
                    },
                );
            }
        }
        Ok(BatchRead {
            buckets,
            server_ms: self.inner.clock.now_ms(),
        })
    }

    async fn get_config(&self, key: &str) -> Result<Option<ConfigRecord>, StorageError> {
        self.get_typed("get_config", key, |value| match value {
            Value::Config(record) => Some(record.clone()),
            _ => None,
        })
    }

    async fn put_config(&self, key: &str, record: &ConfigRecord) -> Result<(), StorageError> {
        self.check_fault("put_config")?;
        let mut items = self.inner.items.lock().unwrap();
        let version = items.get(key).map(|i| i.version + 1).unwrap_or(1);
        items.insert(
            key.to_string(),
            Item {
                version,
                value: Value::Config(record.clone()),
            },
        );
        Ok(())
    }

    async fn delete_config(&self, key: &str) -> Result<bool, StorageError> {
        self.delete("delete_config", key)
    }

    async fn list_config_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.check_fault("list_config_keys")?;
        let items = self.inner.items.lock().unwrap();
        Ok(items
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .filter(|(_, item)| matches!(item.value, Value::Config(_)))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn get_entity(&self, key: &str) -> Result<Option<EntityRecord>, StorageError> {
        self.get_typed("get_entity", key, |value| match value {
            Value::Entity(record) => Some(record.clone()),
            _ => None,
        })
    }

    async fn put_entity_new(&self, key: &str, record: &EntityRecord) -> Result<(), StorageError> {
        self.put_new("put_entity_new", key, Value::Entity(record.clone()))?;
        Ok(())
    }

    async fn delete_entity(&self, key: &str) -> Result<bool, StorageError> {
        self.delete("delete_entity", key)
    }

    async fn list_child_entities(
        &self,
        prefix: &str,
        parent_id: &str,
    ) -> Result<Vec<EntityRecord>, StorageError> {
        self.check_fault("list_child_entities")?;
        let items = self.inner.items.lock().unwrap();
        Ok(items
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .filter_map(|(_, item)| match &item.value {
                Value::Entity(record) if record.parent_id.as_deref() == Some(parent_id) => {
                    Some(record.clone())
                }
                _ => None,
            })
            .collect())
    }

    async fn get_namespace(&self, name: &str) -> Result<Option<NamespaceRecord>, StorageError> {
        let key = tollgate_core::namespace_registry_key(name);
        self.get_typed("get_namespace", &key, |value| match value {
            Value::Namespace(record) => Some(record.clone()),
            _ => None,
        })
    }

    async fn put_namespace_new(&self, record: &NamespaceRecord) -> Result<(), StorageError> {
        let key = tollgate_core::namespace_registry_key(&record.name);
        self.put_new("put_namespace_new", &key, Value::Namespace(record.clone()))?;
        Ok(())
    }

    async fn get_schema_version(&self) -> Result<Option<u32>, StorageError> {
        let key = tollgate_core::schema_version_key();
        self.get_typed("get_schema_version", &key, |value| match value {
            Value::Schema(version) => Some(*version),
            _ => None,
        })
    }

    async fn put_schema_version_new(&self, version: u32) -> Result<(), StorageError> {
        let key = tollgate_core::schema_version_key();
        self.put_new("put_schema_version_new", &key, Value::Schema(version))?;
        Ok(())
    }

    async fn server_time_ms(&self) -> Result<i64, StorageError> {
        self.check_fault("server_time_ms")?;
        Ok(self.inner.clock.now_ms())
    }

    async fn is_reachable(&self, _timeout: Duration) -> bool {
        !self.inner.faults.lock().unwrap().fail_all
    }
}
