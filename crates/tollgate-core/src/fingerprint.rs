use crate::key::{ConfigScope, ScopeKind};

/// Stable config-cache key.
///
/// Two lookups with identical resolved-config requirements produce equal
/// fingerprints, so they share one cache slot. The string form is
/// `<scope-kind>@<namespace>[:entity][:resource]`; identifiers cannot
/// contain `@` or `:` separators ambiguously because scope kind fixes the
/// field count.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    kind: ScopeKind,
    repr: String,
}

impl Fingerprint {
    /// Fingerprint of one config scope inside `namespace`.
    pub fn for_scope(namespace: &str, scope: &ConfigScope) -> Self {
        let repr = match scope {
            ConfigScope::System => format!("system@{namespace}"),
            ConfigScope::Resource(resource) => format!("resource@{namespace}:{resource}"),
            ConfigScope::Entity(entity_id) => format!("entity@{namespace}:{entity_id}"),
            ConfigScope::EntityResource(entity_id, resource) => {
                format!("entity-resource@{namespace}:{entity_id}:{resource}")
            }
        };
        Self {
            kind: scope.kind(),
            repr,
        }
    }

    pub fn kind(&self) -> ScopeKind {
        self.kind
    }

    pub fn as_str(&self) -> &str {
        &self.repr
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.repr)
    }
}
