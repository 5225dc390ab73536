//! Entity and config CRUD.
//!
//! Config writes replace records wholesale (no merge) and keep the config
//! cache coherent: successful mutations write through, deletes evict the
//! exact fingerprints they affect (which also drops any stale negative
//! marker for that scope).

use crate::cache::{CachedScope, ScopeConfig};
use crate::error::Error;
use crate::RateLimiter;
use tollgate_core::{
    entity_key, resource_defaults_prefix, validate_identifier, ConfigScope, Limit, OnUnavailable,
};
use tollgate_storage::{ConfigRecord, EntityRecord, StorageAdapter, StorageError};

/// The system-default record: limits plus the optional unavailability
/// policy (the system scope is the only one allowed to define it).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemDefaults {
    pub limits: Vec<Limit>,
    pub on_unavailable: Option<OnUnavailable>,
}

impl<S: StorageAdapter> RateLimiter<S> {
    /// Creates an entity, optionally under a parent (which must exist).
    pub async fn create_entity(
        &self,
        entity_id: &str,
        parent_id: Option<&str>,
        name: Option<&str>,
    ) -> Result<EntityRecord, Error> {
        validate_identifier(entity_id)?;
        if let Some(parent) = parent_id {
            validate_identifier(parent)?;
            let parent_key = entity_key(self.opaque_ns(), parent);
            let exists = self
                .with_timeout(self.storage.get_entity(&parent_key))
                .await
                .map_err(Error::from_storage)?
                .is_some();
            if !exists {
                return Err(Error::EntityNotFound {
                    entity_id: parent.to_string(),
                });
            }
        }

        let created_at_ms = self
            .with_timeout(self.storage.server_time_ms())
            .await
            .map_err(Error::from_storage)?;
        let record = EntityRecord {
            entity_id: entity_id.to_string(),
            name: name.map(str::to_string),
            parent_id: parent_id.map(str::to_string),
            created_at_ms,
        };
        let key = entity_key(self.opaque_ns(), entity_id);
        match self.with_timeout(self.storage.put_entity_new(&key, &record)).await {
            Ok(()) => Ok(record),
            Err(StorageError::AlreadyExists { .. }) => Err(Error::EntityAlreadyExists {
                entity_id: entity_id.to_string(),
            }),
            Err(other) => Err(Error::from_storage(other)),
        }
    }

    /// Reads an entity record; absent entities are an error.
    pub async fn get_entity(&self, entity_id: &str) -> Result<EntityRecord, Error> {
        validate_identifier(entity_id)?;
        let key = entity_key(self.opaque_ns(), entity_id);
        self.with_timeout(self.storage.get_entity(&key))
            .await
            .map_err(Error::from_storage)?
            .ok_or_else(|| Error::EntityNotFound {
                entity_id: entity_id.to_string(),
            })
    }

    /// Deletes an entity record; with `cascade`, its direct children go
    /// too. Buckets are left behind for the store's TTL to reap.
    pub async fn delete_entity(&self, entity_id: &str, cascade: bool) -> Result<(), Error> {
        validate_identifier(entity_id)?;
        if cascade {
            let prefix = format!("{}/ENTITY#", self.opaque_ns());
            let children = self
                .with_timeout(self.storage.list_child_entities(&prefix, entity_id))
                .await
                .map_err(Error::from_storage)?;
            for child in children {
                let child_key = entity_key(self.opaque_ns(), &child.entity_id);
                self.with_timeout(self.storage.delete_entity(&child_key))
                    .await
                    .map_err(Error::from_storage)?;
            }
        }
        let key = entity_key(self.opaque_ns(), entity_id);
        let existed = self
            .with_timeout(self.storage.delete_entity(&key))
            .await
            .map_err(Error::from_storage)?;
        if !existed {
            return Err(Error::EntityNotFound {
                entity_id: entity_id.to_string(),
            });
        }
        Ok(())
    }

    /// Writes the system-default record (limits and, optionally, the
    /// fail-open/fail-closed policy), replacing any previous record.
    pub async fn set_system_defaults(
        &self,
        limits: &[Limit],
        on_unavailable: Option<OnUnavailable>,
    ) -> Result<(), Error> {
        let record = ConfigRecord::new(limits, on_unavailable)?;
        self.put_scope(&ConfigScope::System, &record).await?;
        self.cache_scope(
            &ConfigScope::System,
            ScopeConfig {
                limits: limits.to_vec(),
                on_unavailable,
            },
        );
        Ok(())
    }

    /// Reads the system defaults, served from cache inside the TTL.
    pub async fn get_system_defaults(&self) -> Result<Option<SystemDefaults>, Error> {
        match self.lookup_scope(&ConfigScope::System).await? {
            CachedScope::Present(config) => Ok(Some(SystemDefaults {
                limits: config.limits.clone(),
                on_unavailable: config.on_unavailable,
            })),
            CachedScope::Absent => Ok(None),
        }
    }

    /// Deletes the system defaults. Returns whether a record existed.
    pub async fn delete_system_defaults(&self) -> Result<bool, Error> {
        self.delete_scope(&ConfigScope::System).await
    }

    /// Writes the defaults for one resource, replacing any previous record.
    pub async fn set_resource_defaults(
        &self,
        resource: &str,
        limits: &[Limit],
    ) -> Result<(), Error> {
        validate_identifier(resource)?;
        let scope = ConfigScope::Resource(resource.to_string());
        let record = ConfigRecord::new(limits, None)?;
        self.put_scope(&scope, &record).await?;
        self.cache_scope(
            &scope,
            ScopeConfig {
                limits: limits.to_vec(),
                on_unavailable: None,
            },
        );
        Ok(())
    }

    /// Reads one resource's defaults, served from cache inside the TTL.
    pub async fn get_resource_defaults(&self, resource: &str) -> Result<Option<Vec<Limit>>, Error> {
        validate_identifier(resource)?;
        self.get_scope_limits(ConfigScope::Resource(resource.to_string()))
            .await
    }

    /// Deletes one resource's defaults. Returns whether a record existed.
    pub async fn delete_resource_defaults(&self, resource: &str) -> Result<bool, Error> {
        validate_identifier(resource)?;
        self.delete_scope(&ConfigScope::Resource(resource.to_string()))
            .await
    }

    /// Every resource in this namespace with stored defaults.
    pub async fn list_resources_with_defaults(&self) -> Result<Vec<String>, Error> {
        let prefix = resource_defaults_prefix(self.opaque_ns());
        let keys = self
            .with_timeout(self.storage.list_config_keys(&prefix))
            .await
            .map_err(Error::from_storage)?;
        Ok(keys
            .into_iter()
            .filter_map(|key| key.strip_prefix(&prefix).map(str::to_string))
            .collect())
    }

    /// Writes limits for an entity: across all resources when `resource`
    /// is `None`, or for one `(entity, resource)` pair. Replaces any
    /// previous record at that scope.
    pub async fn set_limits(
        &self,
        entity_id: &str,
        resource: Option<&str>,
        limits: &[Limit],
    ) -> Result<(), Error> {
        let scope = Self::entity_scope(entity_id, resource)?;
        let record = ConfigRecord::new(limits, None)?;
        self.put_scope(&scope, &record).await?;
        self.cache_scope(
            &scope,
            ScopeConfig {
                limits: limits.to_vec(),
                on_unavailable: None,
            },
        );
        Ok(())
    }

    /// Reads the stored limits at an entity scope, served from cache
    /// inside the TTL.
    pub async fn get_limits(
        &self,
        entity_id: &str,
        resource: Option<&str>,
    ) -> Result<Option<Vec<Limit>>, Error> {
        self.get_scope_limits(Self::entity_scope(entity_id, resource)?)
            .await
    }

    /// Deletes the record at an entity scope. Returns whether it existed.
    pub async fn delete_limits(
        &self,
        entity_id: &str,
        resource: Option<&str>,
    ) -> Result<bool, Error> {
        let scope = Self::entity_scope(entity_id, resource)?;
        self.delete_scope(&scope).await
    }

    fn entity_scope(entity_id: &str, resource: Option<&str>) -> Result<ConfigScope, Error> {
        validate_identifier(entity_id)?;
        match resource {
            Some(resource) => {
                validate_identifier(resource)?;
                Ok(ConfigScope::EntityResource(
                    entity_id.to_string(),
                    resource.to_string(),
                ))
            }
            None => Ok(ConfigScope::Entity(entity_id.to_string())),
        }
    }

    async fn put_scope(&self, scope: &ConfigScope, record: &ConfigRecord) -> Result<(), Error> {
        let key = scope.key(self.opaque_ns());
        self.with_timeout(self.storage.put_config(&key, record))
            .await
            .map_err(Error::from_storage)
    }

    async fn delete_scope(&self, scope: &ConfigScope) -> Result<bool, Error> {
        let key = scope.key(self.opaque_ns());
        let existed = self
            .with_timeout(self.storage.delete_config(&key))
            .await
            .map_err(Error::from_storage)?;
        // Evicts the record and, for system/resource scopes, any negative
        // marker that would otherwise shadow a later write.
        self.invalidate_scope(scope);
        Ok(existed)
    }

    async fn get_scope_limits(&self, scope: ConfigScope) -> Result<Option<Vec<Limit>>, Error> {
        match self.lookup_scope(&scope).await? {
            CachedScope::Present(config) => Ok(Some(config.limits.clone())),
            CachedScope::Absent => Ok(None),
        }
    }
}
