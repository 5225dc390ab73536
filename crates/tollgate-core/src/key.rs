//! Storage key construction.
//!
//! Every key the limiter hands to the storage adapter is built here, so the
//! on-disk layout has exactly one source of truth. Keys are
//! `<namespace-opaque-id>/<record-kind>#<parts...>`; `#` and `/` are the two
//! separators, which is why identifiers may not contain them.

use crate::error::ValidationError;

/// Namespace id that prefixes system-global records (schema version,
/// namespace registry). Never issued to tenants.
pub const RESERVED_NAMESPACE: &str = "_";

/// Checks an entity id, resource, limit name, or namespace name against the
/// key model.
pub fn validate_identifier(value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::InvalidIdentifier {
            value: value.to_string(),
            reason: "must not be empty",
        });
    }
    if value.contains('#') || value.contains('/') {
        return Err(ValidationError::InvalidIdentifier {
            value: value.to_string(),
            reason: "must not contain `#` or `/`",
        });
    }
    Ok(())
}

/// Key of one persistent bucket: `(namespace, entity_id, resource)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketKey {
    namespace: String,
    entity_id: String,
    resource: String,
}

impl BucketKey {
    pub fn new(
        namespace: impl Into<String>,
        entity_id: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            entity_id: entity_id.into(),
            resource: resource.into(),
        }
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// The storage key string.
    pub fn encode(&self) -> String {
        format!(
            "{}/BUCKET#{}#{}",
            self.namespace, self.entity_id, self.resource
        )
    }
}

impl std::fmt::Display for BucketKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Coarse scope classification, used for fingerprints and cache metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeKind {
    System,
    Resource,
    Entity,
    EntityResource,
}

impl ScopeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeKind::System => "system",
            ScopeKind::Resource => "resource",
            ScopeKind::Entity => "entity",
            ScopeKind::EntityResource => "entity-resource",
        }
    }
}

/// One of the four config-record scopes.
///
/// Resolution precedence is entity+resource, then entity-default, then
/// resource-default, then system-default.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConfigScope {
    /// The singleton system default.
    System,
    /// Defaults for one resource across all entities.
    Resource(String),
    /// Defaults for one entity across all resources.
    Entity(String),
    /// The narrowest scope: one entity on one resource.
    EntityResource(String, String),
}

impl ConfigScope {
    pub fn kind(&self) -> ScopeKind {
        match self {
            ConfigScope::System => ScopeKind::System,
            ConfigScope::Resource(_) => ScopeKind::Resource,
            ConfigScope::Entity(_) => ScopeKind::Entity,
            ConfigScope::EntityResource(_, _) => ScopeKind::EntityResource,
        }
    }

    /// The storage key for this scope's record inside `namespace`.
    pub fn key(&self, namespace: &str) -> String {
        match self {
            ConfigScope::System => format!("{namespace}/SYSTEM#DEFAULTS"),
            ConfigScope::Resource(resource) => format!("{namespace}/RESOURCE#{resource}"),
            ConfigScope::Entity(entity_id) => format!("{namespace}/ENTITY#{entity_id}#DEFAULTS"),
            ConfigScope::EntityResource(entity_id, resource) => {
                format!("{namespace}/ENTITY#{entity_id}#LIMITS#{resource}")
            }
        }
    }
}

/// Prefix shared by every resource-default record in `namespace`; used to
/// enumerate resources with stored defaults.
pub fn resource_defaults_prefix(namespace: &str) -> String {
    format!("{namespace}/RESOURCE#")
}

/// Key of an entity record (id, optional name, optional parent).
pub fn entity_key(namespace: &str, entity_id: &str) -> String {
    format!("{namespace}/ENTITY#{entity_id}")
}

/// Key of the registry record mapping a human namespace name to its opaque
/// id. Lives under the reserved namespace.
pub fn namespace_registry_key(name: &str) -> String {
    format!("{RESERVED_NAMESPACE}/NAMESPACE#{name}")
}

/// Key of the schema-version record under the reserved namespace.
pub fn schema_version_key() -> String {
    format!("{RESERVED_NAMESPACE}/SCHEMA#VERSION")
}
