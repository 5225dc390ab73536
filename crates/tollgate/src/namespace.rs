//! Namespace registration and opaque-id resolution.
//!
//! Every key a limiter touches is prefixed with its namespace's opaque id.
//! The id is a short random URL-safe token drawn once at registration and
//! persisted in the reserved `_` namespace; it is deliberately not derived
//! from the human name, so tenants cannot guess each other's prefixes.

use crate::error::Error;
use rand::distr::Alphanumeric;
use rand::Rng;
use tollgate_core::{validate_identifier, ValidationError, RESERVED_NAMESPACE};
use tollgate_storage::{NamespaceRecord, StorageAdapter, StorageError};

const OPAQUE_ID_LEN: usize = 10;

pub(crate) fn generate_opaque_id() -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(OPAQUE_ID_LEN)
        .map(char::from)
        .collect()
}

/// Looks up the namespace record for `name`, registering it with a fresh
/// opaque id on first use. A concurrent registration race is resolved by
/// the conditional create: the loser re-reads the winner's record.
pub(crate) async fn resolve_or_register<S: StorageAdapter>(
    storage: &S,
    name: &str,
) -> Result<NamespaceRecord, Error> {
    validate_identifier(name)?;
    if name == RESERVED_NAMESPACE {
        return Err(Error::Validation(ValidationError::ReservedNamespace {
            name: name.to_string(),
        }));
    }

    if let Some(record) = storage.get_namespace(name).await.map_err(Error::from_storage)? {
        return Ok(record);
    }

    let candidate = NamespaceRecord {
        name: name.to_string(),
        opaque_id: generate_opaque_id(),
    };
    match storage.put_namespace_new(&candidate).await {
        Ok(()) => Ok(candidate),
        Err(StorageError::AlreadyExists { .. }) => storage
            .get_namespace(name)
            .await
            .map_err(Error::from_storage)?
            .ok_or_else(|| {
                Error::Storage(StorageError::NotFound {
                    key: tollgate_core::namespace_registry_key(name),
                })
            }),
        Err(other) => Err(Error::from_storage(other)),
    }
}
