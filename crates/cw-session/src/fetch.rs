//! Fetching module binaries

use async_trait::async_trait;
use cw_core::{SessionError, SystemDescriptor};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Source of module binaries
#[async_trait]
pub trait ModuleFetcher: Send + Sync {
    /// Fetch the bytes at `location` (wasm binary or text)
    async fn fetch(&self, location: &str) -> Result<Vec<u8>, SessionError>;
}

/// Reads modules from disk; relative locations resolve against `base`
#[derive(Debug, Clone)]
pub struct FsModuleFetcher {
    base: PathBuf,
}

impl FsModuleFetcher {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    fn resolve(&self, location: &str) -> PathBuf {
        let path = Path::new(location);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base.join(path)
        }
    }
}

#[async_trait]
impl ModuleFetcher for FsModuleFetcher {
    async fn fetch(&self, location: &str) -> Result<Vec<u8>, SessionError> {
        let path = self.resolve(location);
        debug!("Fetching module from {}", path.display());
        tokio::fs::read(&path)
            .await
            .map_err(|e| SessionError::ModuleLoad(format!("cannot read {}: {}", path.display(), e)))
    }
}

/// In-memory module table, keyed by location
#[derive(Debug, Default)]
pub struct MemoryModuleFetcher {
    modules: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryModuleFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `bytes` under `location`
    pub fn insert(&self, location: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.modules.write().insert(location.into(), bytes.into());
    }

    pub fn with(self, location: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.insert(location, bytes);
        self
    }
}

#[async_trait]
impl ModuleFetcher for MemoryModuleFetcher {
    async fn fetch(&self, location: &str) -> Result<Vec<u8>, SessionError> {
        self.modules
            .read()
            .get(location)
            .cloned()
            .ok_or_else(|| SessionError::ModuleLoad(format!("no module at '{location}'")))
    }
}

/// Fetch the module for `descriptor`, bounded by `timeout`
pub async fn fetch_module(
    fetcher: &dyn ModuleFetcher,
    descriptor: &SystemDescriptor,
    timeout: Duration,
) -> Result<Vec<u8>, SessionError> {
    match tokio::time::timeout(timeout, fetcher.fetch(&descriptor.module_location)).await {
        Ok(Ok(bytes)) => {
            info!(
                "Fetched module for '{}' ({} bytes)",
                descriptor.system_id,
                bytes.len()
            );
            Ok(bytes)
        }
        Ok(Err(e)) => Err(e),
        Err(_) => Err(SessionError::FetchTimeout {
            system: descriptor.system_id.to_string(),
            timeout_ms: millis(timeout),
        }),
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cw_core::{ScreenGeometry, SystemId};

    struct PendingFetcher;

    #[async_trait]
    impl ModuleFetcher for PendingFetcher {
        async fn fetch(&self, _location: &str) -> Result<Vec<u8>, SessionError> {
            std::future::pending().await
        }
    }

    fn descriptor(location: &str) -> SystemDescriptor {
        SystemDescriptor {
            system_id: SystemId::new("gba"),
            name: "Game Boy Advance".to_string(),
            module_location: location.to_string(),
            accepted_extensions: vec!["gba".to_string()],
            initial_memory_pages: 1,
            frame_rate_hz: 59.7275,
            screen: ScreenGeometry::new(240, 160),
            secondary_screen: None,
            firmware_key: None,
            asset_offset: 0,
        }
    }

    #[tokio::test]
    async fn test_memory_fetcher() {
        let fetcher = MemoryModuleFetcher::new().with("gba.wasm", b"\0asm".to_vec());
        let bytes = fetch_module(&fetcher, &descriptor("gba.wasm"), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(bytes, b"\0asm");

        let err = fetch_module(&fetcher, &descriptor("nes.wasm"), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.is_load_failure());
    }

    #[tokio::test]
    async fn test_fs_fetcher_relative_and_absolute() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("gba.wasm"), b"module").unwrap();

        let fetcher = FsModuleFetcher::new(dir.path());
        assert_eq!(fetcher.fetch("gba.wasm").await.unwrap(), b"module");

        let absolute = dir.path().join("gba.wasm");
        let other = FsModuleFetcher::new("/nonexistent");
        assert_eq!(other.fetch(absolute.to_str().unwrap()).await.unwrap(), b"module");

        assert!(matches!(
            fetcher.fetch("missing.wasm").await,
            Err(SessionError::ModuleLoad(_))
        ));
    }

    #[test]
    fn test_timeout_millis_saturates() {
        assert_eq!(millis(Duration::from_millis(250)), 250);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_timeout() {
        let err = fetch_module(&PendingFetcher, &descriptor("gba.wasm"), Duration::from_millis(250))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            SessionError::FetchTimeout {
                system: "gba".to_string(),
                timeout_ms: 250,
            }
        );
        assert!(err.is_load_failure());
    }
}
