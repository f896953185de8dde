//! The blob store contract

use async_trait::async_trait;
use cw_core::StoreError;

/// Durable key -> bytes persistence scoped to one namespace.
///
/// Every operation is individually atomic: a `put` either replaces the prior
/// value completely or fails without an observable partial write.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Namespace this store is scoped to
    fn namespace(&self) -> &str;

    /// Insert or replace the value under `key`
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError>;

    /// Fetch the value under `key`; `Ok(None)` when absent
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// All keys, sorted
    async fn list(&self) -> Result<Vec<String>, StoreError>;

    /// Remove `key`. Removing an absent key succeeds.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Whether `key` is present
    async fn contains(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key).await?.is_some())
    }
}

/// Check that `key` is a plain file name.
///
/// Leading dots are reserved for in-flight writes.
pub fn validate_key(key: &str) -> Result<(), StoreError> {
    let valid = !key.is_empty()
        && key.len() <= 255
        && !key.starts_with('.')
        && !key.contains(['/', '\\', '\0'])
        && !key.chars().any(char::is_control);
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}

/// Namespaces follow the same rules as keys
pub fn validate_namespace(namespace: &str) -> Result<(), StoreError> {
    validate_key(namespace).map_err(|_| StoreError::InvalidNamespace(namespace.to_string()))
}
