//! Game library on top of the blob store
//!
//! The library decides what a file name is before anything is written:
//! unsupported names never reach the store, firmware images land in their
//! system's firmware slot, and save states are keyed per asset and system.
//! With a default system configured, names no system claims are taken as
//! games of that system.

use cw_core::{
    AssetClass, AssetKind, CartwheelError, Config, RegistryError, Result, SystemDescriptor,
    SystemId,
};
use cw_registry::ModuleRegistry;
use cw_session::snapshot::{parse_state_key, state_key};
use cw_session::Snapshot;
use cw_store::{Asset, BlobStore, FsBlobStore};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// A stored asset the registry knows how to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryEntry {
    pub name: String,
    pub class: AssetClass,
}

/// A stored save state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateEntry {
    pub key: String,
    pub asset_name: String,
    pub system_id: SystemId,
}

/// Assets, firmware and save states of one store namespace
#[derive(Clone)]
pub struct Library {
    store: Arc<dyn BlobStore>,
    registry: Arc<ModuleRegistry>,
    /// System for names the registry cannot route
    default_system: Option<SystemId>,
}

impl std::fmt::Debug for Library {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Library")
            .field("namespace", &self.store.namespace())
            .field("systems", &self.registry.len())
            .field("default_system", &self.default_system)
            .finish()
    }
}

fn file_name_of(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| CartwheelError::Config(format!("not a file path: {}", path.display())))
}

impl Library {
    pub fn new(store: Arc<dyn BlobStore>, registry: Arc<ModuleRegistry>) -> Self {
        Self {
            store,
            registry,
            default_system: None,
        }
    }

    /// Route names no system claims to `system`; fails if it is not registered
    pub fn with_default_system(mut self, system: &str) -> Result<Self> {
        let system_id = self.system(system)?.system_id.clone();
        debug!("Unrouted names default to '{}'", system_id);
        self.default_system = Some(system_id);
        Ok(self)
    }

    /// Open the configured namespace on disk with the configured systems
    pub async fn open(config: &Config) -> Result<Self> {
        let registry = ModuleRegistry::from_config(config)?;
        let store = FsBlobStore::open(&config.paths.data_dir, &config.store.namespace).await?;
        let library = Self::new(Arc::new(store), Arc::new(registry));
        match config.general.default_system.as_deref() {
            Some(system) => library.with_default_system(system),
            None => Ok(library),
        }
    }

    pub fn store(&self) -> &dyn BlobStore {
        self.store.as_ref()
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// Descriptor an asset name routes to
    pub fn resolve(&self, name: &str) -> Result<&SystemDescriptor> {
        let class = self.classify(name)?;
        self.system(class.system_id.as_str())
    }

    /// Registry classification, falling back to the default system.
    ///
    /// Save-state keys never fall back, so they are not mistaken for games.
    pub fn classify(&self, name: &str) -> Result<AssetClass> {
        match (self.registry.classify(name), &self.default_system) {
            (Err(RegistryError::UnsupportedAssetKind(_)), Some(system_id))
                if parse_state_key(name).is_none() =>
            {
                Ok(AssetClass {
                    kind: AssetKind::Game,
                    system_id: system_id.clone(),
                })
            }
            (result, _) => Ok(result?),
        }
    }

    /// Store an asset under `name`, replacing any previous one.
    ///
    /// Names the registry cannot route are rejected before the store is touched.
    /// Firmware is stored under its system's canonical slot key.
    pub async fn import(&self, name: &str, bytes: &[u8]) -> Result<LibraryEntry> {
        let class = self.classify(name)?;
        let key = match class.kind {
            AssetKind::Game => name.to_string(),
            AssetKind::Firmware => self.firmware_slot(&class.system_id)?,
        };

        let asset = Asset::new(key, bytes.to_vec(), class);
        asset.save(self.store.as_ref()).await?;
        info!(
            "Imported '{}' ({:?} for '{}', {} bytes)",
            asset.name,
            asset.kind(),
            asset.system_id(),
            asset.len()
        );
        Ok(LibraryEntry {
            name: asset.name,
            class: asset.class,
        })
    }

    /// Import a host file under its own file name
    pub async fn import_file(&self, path: &Path) -> Result<LibraryEntry> {
        let name = file_name_of(path)?;
        // Route first so an unsupported file is never read in full
        self.classify(&name)?;
        let bytes = tokio::fs::read(path).await?;
        self.import(&name, &bytes).await
    }

    /// Fill a system's firmware slot regardless of the source file name
    pub async fn import_firmware(&self, system: &str, bytes: &[u8]) -> Result<LibraryEntry> {
        let system_id = self.system(system)?.system_id.clone();
        let key = self.firmware_slot(&system_id)?;
        self.store.put(&key, bytes).await?;
        info!("Stored firmware for '{}' as '{}' ({} bytes)", system_id, key, bytes.len());
        Ok(LibraryEntry {
            name: key,
            class: AssetClass {
                kind: AssetKind::Firmware,
                system_id,
            },
        })
    }

    fn system(&self, system: &str) -> Result<&SystemDescriptor> {
        self.registry
            .get(&SystemId::new(system))
            .ok_or_else(|| RegistryError::UnknownSystem(system.to_string()).into())
    }

    fn firmware_slot(&self, system_id: &SystemId) -> Result<String> {
        self.registry
            .firmware_key(system_id)
            .map(str::to_ascii_lowercase)
            .ok_or_else(|| {
                RegistryError::UnsupportedAssetKind(format!("firmware for '{system_id}'")).into()
            })
    }

    async fn entries(&self, kind: AssetKind) -> Result<Vec<LibraryEntry>> {
        let mut entries = Vec::new();
        for name in self.store.list().await? {
            match self.classify(&name) {
                Ok(class) if class.kind == kind => entries.push(LibraryEntry { name, class }),
                Ok(_) => {}
                Err(_) => debug!("Skipping '{}' in library listing", name),
            }
        }
        Ok(entries)
    }

    /// Stored games of supported systems, ordered by name
    pub async fn list_games(&self) -> Result<Vec<LibraryEntry>> {
        self.entries(AssetKind::Game).await
    }

    /// Filled firmware slots
    pub async fn list_firmware(&self) -> Result<Vec<LibraryEntry>> {
        self.entries(AssetKind::Firmware).await
    }

    /// Stored save states
    pub async fn list_states(&self) -> Result<Vec<StateEntry>> {
        Ok(self
            .store
            .list()
            .await?
            .into_iter()
            .filter_map(|key| {
                let (asset_name, system_id) = parse_state_key(&key)?;
                let asset_name = asset_name.to_string();
                Some(StateEntry {
                    key,
                    asset_name,
                    system_id,
                })
            })
            .collect())
    }

    /// Read a game or firmware asset
    pub async fn get(&self, name: &str) -> Result<Asset> {
        let class = self.classify(name)?;
        Asset::load(self.store.as_ref(), name, class)
            .await?
            .ok_or_else(|| CartwheelError::AssetNotFound(name.to_string()))
    }

    /// Firmware stored for a system, if its slot is filled
    pub async fn firmware_for(&self, system_id: &SystemId) -> Result<Option<Vec<u8>>> {
        match self.registry.firmware_key(system_id) {
            Some(key) => Ok(self.store.get(&key.to_ascii_lowercase()).await?),
            None => Ok(None),
        }
    }

    /// Remove any stored key; removing an absent key succeeds
    pub async fn delete(&self, name: &str) -> Result<()> {
        self.store.delete(name).await?;
        info!("Deleted '{}'", name);
        Ok(())
    }

    /// Write any stored value to a host file, byte for byte
    pub async fn export(&self, name: &str, dest: &Path) -> Result<usize> {
        let bytes = self
            .store
            .get(name)
            .await?
            .ok_or_else(|| CartwheelError::AssetNotFound(name.to_string()))?;
        tokio::fs::write(dest, &bytes).await?;
        info!("Exported '{}' to {} ({} bytes)", name, dest.display(), bytes.len());
        Ok(bytes.len())
    }

    /// Persist a snapshot in the state slot of `asset_name`
    pub async fn put_state(&self, asset_name: &str, snapshot: &Snapshot) -> Result<String> {
        let key = state_key(asset_name, &snapshot.system_id);
        self.store.put(&key, &snapshot.bytes).await?;
        info!("Saved state '{}' ({} bytes)", key, snapshot.len());
        Ok(key)
    }

    /// Read the state slot of `asset_name` on `system_id`
    pub async fn get_state(&self, asset_name: &str, system_id: &SystemId) -> Result<Option<Snapshot>> {
        let key = state_key(asset_name, system_id);
        Ok(self
            .store
            .get(&key)
            .await?
            .map(|bytes| Snapshot::new(system_id.clone(), bytes)))
    }

    /// Read an external state file, tagging it with the system it was captured on
    pub async fn read_state_file(&self, path: &Path, system: &str) -> Result<Snapshot> {
        let system_id = self.system(system)?.system_id.clone();
        let bytes = tokio::fs::read(path).await?;
        debug!("Read {} bytes of '{}' state from {}", bytes.len(), system_id, path.display());
        Ok(Snapshot::new(system_id, bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cw_store::MemoryBlobStore;

    fn library() -> Library {
        let store = MemoryBlobStore::new("library").unwrap();
        let registry = ModuleRegistry::builtin().unwrap();
        Library::new(Arc::new(store), Arc::new(registry))
    }

    #[tokio::test]
    async fn test_import_and_list() {
        let library = library();
        library.import("zelda.gba", &[0xFF; 128]).await.unwrap();
        library.import("mario.nes", &[0x01; 16]).await.unwrap();
        library.import("GBA_BIOS.BIN", &[0x42; 16]).await.unwrap();

        let games: Vec<String> = library
            .list_games()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(games, vec!["mario.nes", "zelda.gba"]);

        let firmware = library.list_firmware().await.unwrap();
        assert_eq!(firmware.len(), 1);
        assert_eq!(firmware[0].name, "gba_bios.bin");
        assert_eq!(
            library.firmware_for(&SystemId::new("gba")).await.unwrap(),
            Some(vec![0x42; 16])
        );
    }

    #[tokio::test]
    async fn test_import_rejects_unsupported() {
        let library = library();
        let err = library.import("game.unknownext", &[1, 2, 3]).await.unwrap_err();
        assert!(matches!(
            err,
            CartwheelError::Registry(RegistryError::UnsupportedAssetKind(_))
        ));
        assert!(library.store().list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_import_firmware_by_system() {
        let library = library();
        let entry = library.import_firmware("DS", &[7; 8]).await.unwrap();
        assert_eq!(entry.name, "nds_bios.bin");
        assert_eq!(entry.class.kind, AssetKind::Firmware);

        assert!(matches!(
            library.import_firmware("nes", &[0]).await.unwrap_err(),
            CartwheelError::Registry(RegistryError::UnsupportedAssetKind(_))
        ));
        assert!(matches!(
            library.import_firmware("dreamcast", &[0]).await.unwrap_err(),
            CartwheelError::Registry(RegistryError::UnknownSystem(_))
        ));
    }

    #[tokio::test]
    async fn test_states_and_delete() {
        let library = library();
        library.import("zelda.gba", &[0xFF; 4]).await.unwrap();
        let snapshot = Snapshot::new(SystemId::new("gba"), vec![1, 2, 3, 4]);
        let key = library.put_state("zelda.gba", &snapshot).await.unwrap();
        assert_eq!(key, "zelda.gba.gba.state");

        // States never show up as games
        assert_eq!(library.list_games().await.unwrap().len(), 1);
        let states = library.list_states().await.unwrap();
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].asset_name, "zelda.gba");
        assert_eq!(states[0].system_id.as_str(), "gba");

        let restored = library
            .get_state("zelda.gba", &SystemId::new("gba"))
            .await
            .unwrap();
        assert_eq!(restored, Some(snapshot));

        library.delete("zelda.gba").await.unwrap();
        library.delete("zelda.gba").await.unwrap();
        assert!(matches!(
            library.get("zelda.gba").await.unwrap_err(),
            CartwheelError::AssetNotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_same_stem_assets_keep_separate_states() {
        let library = library();
        let snes = SystemId::new("snes");
        library.import("chrono.sfc", &[1; 8]).await.unwrap();
        library.import("chrono.smc", &[2; 8]).await.unwrap();

        library
            .put_state("chrono.sfc", &Snapshot::new(snes.clone(), vec![0xAA; 4]))
            .await
            .unwrap();
        assert_eq!(library.get_state("chrono.smc", &snes).await.unwrap(), None);

        library
            .put_state("chrono.smc", &Snapshot::new(snes.clone(), vec![0xBB; 4]))
            .await
            .unwrap();
        assert_eq!(
            library.get_state("chrono.sfc", &snes).await.unwrap().unwrap().bytes,
            vec![0xAA; 4]
        );

        let mut owners: Vec<String> = library
            .list_states()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.asset_name)
            .collect();
        owners.sort();
        assert_eq!(owners, vec!["chrono.sfc", "chrono.smc"]);
    }

    #[tokio::test]
    async fn test_default_system_routes_unclaimed_names() {
        let library = library().with_default_system("GBA").unwrap();
        let entry = library.import("homebrew.rom", &[0xFF; 16]).await.unwrap();
        assert_eq!(entry.class.kind, AssetKind::Game);
        assert_eq!(entry.class.system_id.as_str(), "gba");
        assert_eq!(library.resolve("homebrew.rom").unwrap().system_id.as_str(), "gba");
        assert_eq!(library.get("homebrew.rom").await.unwrap().bytes, vec![0xFF; 16]);

        // Claimed names keep their own system
        assert_eq!(library.resolve("mario.nes").unwrap().system_id.as_str(), "nes");

        // State slots stay out of the game list
        library
            .put_state("homebrew.rom", &Snapshot::new(SystemId::new("gba"), vec![0; 4]))
            .await
            .unwrap();
        let games: Vec<String> = library
            .list_games()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(games, vec!["homebrew.rom"]);

        assert!(matches!(
            self::library().with_default_system("dreamcast").unwrap_err(),
            CartwheelError::Registry(RegistryError::UnknownSystem(_))
        ));
    }

    #[tokio::test]
    async fn test_export_writes_raw_bytes() {
        let library = library();
        library.import("zelda.gba", &[0xFF; 128]).await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("zelda.gba");

        assert_eq!(library.export("zelda.gba", &dest).await.unwrap(), 128);
        assert_eq!(std::fs::read(&dest).unwrap(), vec![0xFF; 128]);

        assert!(matches!(
            library.export("missing.gba", &dest).await.unwrap_err(),
            CartwheelError::AssetNotFound(_)
        ));
    }
}
