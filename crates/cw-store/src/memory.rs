//! In-memory blob store

use crate::store::{validate_key, validate_namespace, BlobStore};
use async_trait::async_trait;
use cw_core::StoreError;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Volatile blob store, mainly for tests and headless runs
#[derive(Debug)]
pub struct MemoryBlobStore {
    namespace: String,
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new(namespace: &str) -> Result<Self, StoreError> {
        validate_namespace(namespace)?;
        Ok(Self {
            namespace: namespace.to_string(),
            entries: RwLock::new(BTreeMap::new()),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        validate_key(key)?;
        self.entries.write().insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        validate_key(key)?;
        Ok(self.entries.read().get(key).cloned())
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.entries.read().keys().cloned().collect())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        validate_key(key)?;
        self.entries.write().remove(key);
        Ok(())
    }
}
