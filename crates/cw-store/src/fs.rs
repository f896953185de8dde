//! Filesystem-backed blob store
//!
//! One directory per namespace, one file per key. Writes go to a temporary
//! file in the same directory and are renamed over the target, so readers
//! only ever see a complete old value or a complete new value.

use crate::store::{validate_key, validate_namespace, BlobStore};
use async_trait::async_trait;
use cw_core::StoreError;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Prefix of in-flight temporary files
const TEMP_PREFIX: &str = ".cwtmp-";

/// Blob store persisted under `<base>/<namespace>/`
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    namespace: String,
    root: PathBuf,
}

impl FsBlobStore {
    /// Open (creating if needed) the namespace directory under `base`
    pub async fn open(base: impl AsRef<Path>, namespace: &str) -> Result<Self, StoreError> {
        validate_namespace(namespace)?;
        let root = base.as_ref().join(namespace);

        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| StoreError::io(namespace, e))?;

        let store = Self {
            namespace: namespace.to_string(),
            root,
        };
        store.sweep_temp_files().await;

        info!("Opened blob store '{}' at {}", store.namespace, store.root.display());
        Ok(store)
    }

    /// Directory holding this namespace
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    /// Remove temporaries left behind by an interrupted write
    async fn sweep_temp_files(&self) {
        let Ok(mut dir) = tokio::fs::read_dir(&self.root).await else {
            return;
        };
        while let Ok(Some(entry)) = dir.next_entry().await {
            let name = entry.file_name();
            if name.to_string_lossy().starts_with(TEMP_PREFIX) {
                if let Err(e) = tokio::fs::remove_file(entry.path()).await {
                    warn!("Failed to remove stale temp file {:?}: {}", name, e);
                }
            }
        }
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let target = self.path_for(key)?;
        let dir = self.root.clone();
        let data = bytes.to_vec();

        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut tmp = tempfile::Builder::new()
                .prefix(TEMP_PREFIX)
                .tempfile_in(&dir)?;
            tmp.write_all(&data)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&target).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| StoreError::io(key, std::io::Error::other(e)))?
        .map_err(|e| StoreError::io(key, e))?;

        debug!("[{}] put '{}' ({} bytes)", self.namespace, key, bytes.len());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(key, e)),
        }
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        let mut dir = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| StoreError::io(&self.namespace, e))?;

        let mut keys = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&self.namespace, e))?
        {
            let is_file = entry
                .file_type()
                .await
                .map(|t| t.is_file())
                .unwrap_or(false);
            if !is_file {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if validate_key(name).is_ok() {
                    keys.push(name.to_string());
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!("[{}] deleted '{}'", self.namespace, key);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(key, e)),
        }
    }
}
