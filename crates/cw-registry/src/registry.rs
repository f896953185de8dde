//! Module registry
//!
//! Maps system identifiers and file names onto [`SystemDescriptor`]s.
//! Extensions and firmware keys are indexed at registration time, which is
//! where overlapping claims are rejected. Resolution asks each descriptor
//! whether it claims a name, which the disjoint claims make unambiguous.

use crate::builtin::builtin_systems;
use cw_core::{AssetClass, AssetKind, Config, RegistryError, SystemDescriptor, SystemId};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

/// Registry of supported systems
#[derive(Debug, Clone, Default)]
pub struct ModuleRegistry {
    systems: BTreeMap<SystemId, SystemDescriptor>,
    /// Lower-cased extension (no dot) -> owning system
    extensions: HashMap<String, SystemId>,
    /// Lower-cased firmware key -> owning system
    firmware: HashMap<String, SystemId>,
}

fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_ascii_lowercase()
}

impl ModuleRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in system table
    pub fn builtin() -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for desc in builtin_systems() {
            registry.register(desc)?;
        }
        Ok(registry)
    }

    /// Built-in table with the configured descriptors layered on top.
    ///
    /// A configured descriptor replaces a built-in one with the same id.
    pub fn from_config(config: &Config) -> Result<Self, RegistryError> {
        let mut registry = Self::builtin()?;
        for desc in &config.systems {
            registry.replace(desc.clone())?;
        }
        Ok(registry)
    }

    /// Register a new system.
    ///
    /// Fails without modifying the registry if the id is taken or any
    /// extension or firmware key is already claimed by another system.
    pub fn register(&mut self, desc: SystemDescriptor) -> Result<(), RegistryError> {
        let id = desc.system_id.clone();
        if self.systems.contains_key(&id) {
            return Err(RegistryError::DuplicateSystem(id.to_string()));
        }

        let mut extensions: Vec<String> = desc
            .accepted_extensions
            .iter()
            .map(|e| normalize_extension(e))
            .filter(|e| !e.is_empty())
            .collect();
        extensions.sort();
        extensions.dedup();

        for ext in &extensions {
            if let Some(existing) = self.extensions.get(ext) {
                return Err(RegistryError::ExtensionConflict {
                    extension: ext.clone(),
                    existing: existing.to_string(),
                    incoming: id.to_string(),
                });
            }
        }

        let firmware = desc.firmware_key.as_deref().map(|k| k.trim().to_ascii_lowercase());
        if let Some(key) = &firmware {
            if let Some(existing) = self.firmware.get(key) {
                return Err(RegistryError::FirmwareConflict {
                    key: key.clone(),
                    existing: existing.to_string(),
                    incoming: id.to_string(),
                });
            }
        }

        for ext in extensions {
            self.extensions.insert(ext, id.clone());
        }
        if let Some(key) = firmware {
            self.firmware.insert(key, id.clone());
        }

        debug!(
            "Registered system '{}' ({} @ {:.4} Hz)",
            id, desc.module_location, desc.frame_rate_hz
        );
        self.systems.insert(id, desc);
        Ok(())
    }

    /// Register `desc`, replacing any system with the same id
    pub fn replace(&mut self, desc: SystemDescriptor) -> Result<(), RegistryError> {
        let previous = self.unregister(&desc.system_id);
        match self.register(desc) {
            Ok(()) => Ok(()),
            Err(e) => {
                if let Some(previous) = previous {
                    let id = previous.system_id.clone();
                    if let Err(restore) = self.register(previous) {
                        warn!("Could not reinstate system '{}': {}", id, restore);
                    }
                }
                Err(e)
            }
        }
    }

    /// Remove a system and its extension/firmware claims
    pub fn unregister(&mut self, id: &SystemId) -> Option<SystemDescriptor> {
        let desc = self.systems.remove(id)?;
        self.extensions.retain(|_, owner| owner != id);
        self.firmware.retain(|_, owner| owner != id);
        info!("Unregistered system '{}'", id);
        Some(desc)
    }

    /// Direct lookup by system id
    pub fn get(&self, id: &SystemId) -> Option<&SystemDescriptor> {
        self.systems.get(id)
    }

    /// Resolve a system id or a file name.
    ///
    /// An exact system id wins; otherwise the name is routed by firmware key
    /// and then by extension.
    pub fn resolve(&self, system_or_filename: &str) -> Result<&SystemDescriptor, RegistryError> {
        if let Some(desc) = self.systems.get(&SystemId::new(system_or_filename)) {
            return Ok(desc);
        }
        self.classify(system_or_filename)
            .map(|class| &self.systems[&class.system_id])
    }

    /// Decide whether a file name is a game or a firmware image, and for which system
    pub fn classify(&self, file_name: &str) -> Result<AssetClass, RegistryError> {
        if let Some(desc) = self.systems.values().find(|d| d.is_firmware(file_name)) {
            return Ok(AssetClass {
                kind: AssetKind::Firmware,
                system_id: desc.system_id.clone(),
            });
        }

        self.systems
            .values()
            .find(|d| d.accepts(file_name))
            .map(|desc| AssetClass {
                kind: AssetKind::Game,
                system_id: desc.system_id.clone(),
            })
            .ok_or_else(|| RegistryError::UnsupportedAssetKind(file_name.to_string()))
    }

    /// Store key of a system's firmware slot
    pub fn firmware_key(&self, id: &SystemId) -> Option<&str> {
        self.systems.get(id)?.firmware_key.as_deref().map(str::trim)
    }

    /// All descriptors, ordered by id
    pub fn systems(&self) -> impl Iterator<Item = &SystemDescriptor> {
        self.systems.values()
    }

    pub fn len(&self) -> usize {
        self.systems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cw_core::ScreenGeometry;

    fn descriptor(id: &str, extensions: &[&str]) -> SystemDescriptor {
        SystemDescriptor {
            system_id: SystemId::new(id),
            name: id.to_uppercase(),
            module_location: format!("{id}.wasm"),
            accepted_extensions: extensions.iter().map(|s| s.to_string()).collect(),
            initial_memory_pages: 16,
            frame_rate_hz: 60.0,
            screen: ScreenGeometry::new(160, 144),
            secondary_screen: None,
            firmware_key: None,
            asset_offset: 0x1_0000,
        }
    }

    #[test]
    fn test_builtin_registry() {
        let registry = ModuleRegistry::builtin().unwrap();
        assert_eq!(registry.len(), 9);
        assert_eq!(registry.resolve("zelda.gba").unwrap().system_id.as_str(), "gba");
        assert_eq!(registry.resolve("Chrono.SMC").unwrap().system_id.as_str(), "snes");
        assert_eq!(registry.resolve("mario.z64").unwrap().system_id.as_str(), "n64");
        assert!(registry.resolve("pokemon.nds").unwrap().is_dual_screen());
    }

    #[test]
    fn test_resolve_by_system_id() {
        let registry = ModuleRegistry::builtin().unwrap();
        assert_eq!(registry.resolve("GBA").unwrap().system_id.as_str(), "gba");
        assert_eq!(registry.resolve("3ds").unwrap().secondary_screen,
            Some(ScreenGeometry::new(320, 240)));
    }

    #[test]
    fn test_resolve_unknown_extension() {
        let registry = ModuleRegistry::builtin().unwrap();
        assert_eq!(
            registry.resolve("game.unknownext").unwrap_err(),
            RegistryError::UnsupportedAssetKind("game.unknownext".to_string())
        );
        assert!(registry.resolve("no_extension").is_err());
    }

    #[test]
    fn test_resolve_is_deterministic() {
        let registry = ModuleRegistry::builtin().unwrap();
        for name in ["a.gba", "b.gb", "c.gbc", "d.nes", "e.sfc", "f.n64", "g.nds", "h.3ds", "i.iso"] {
            let first = registry.resolve(name).unwrap().system_id.clone();
            for _ in 0..8 {
                assert_eq!(registry.resolve(name).unwrap().system_id, first);
            }
        }
    }

    #[test]
    fn test_firmware_before_extension() {
        let registry = ModuleRegistry::builtin().unwrap();

        let class = registry.classify("gba_bios.bin").unwrap();
        assert_eq!(class.kind, AssetKind::Firmware);
        assert_eq!(class.system_id.as_str(), "gba");

        let class = registry.classify("crash.bin").unwrap();
        assert_eq!(class.kind, AssetKind::Game);
        assert_eq!(class.system_id.as_str(), "ps1");

        assert_eq!(registry.firmware_key(&SystemId::new("gba")), Some("gba_bios.bin"));
        assert_eq!(registry.firmware_key(&SystemId::new("nes")), None);
    }

    #[test]
    fn test_overlapping_extensions_rejected() {
        let mut registry = ModuleRegistry::new();
        registry.register(descriptor("gb", &["gb"])).unwrap();

        let err = registry
            .register(descriptor("gbx", &["gbx", ".GB"]))
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::ExtensionConflict {
                extension: "gb".to_string(),
                existing: "gb".to_string(),
                incoming: "gbx".to_string(),
            }
        );
        // Nothing from the rejected descriptor leaked in
        assert!(registry.resolve("x.gbx").is_err());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_classify_matches_declared_spelling() {
        let mut registry = ModuleRegistry::new();
        let mut gb = descriptor("gb", &[" .GB", "sgb"]);
        gb.firmware_key = Some("DMG_BOOT.bin".to_string());
        registry.register(gb).unwrap();

        let class = registry.classify("tetris.gb").unwrap();
        assert_eq!((class.kind, class.system_id.as_str()), (AssetKind::Game, "gb"));
        let class = registry.classify("dmg_boot.BIN").unwrap();
        assert_eq!((class.kind, class.system_id.as_str()), (AssetKind::Firmware, "gb"));

        // The index used for conflicts sees the same spelling
        assert!(registry.register(descriptor("gbx", &["gb"])).is_err());
    }

    #[test]
    fn test_duplicate_system_rejected() {
        let mut registry = ModuleRegistry::new();
        registry.register(descriptor("nes", &["nes"])).unwrap();
        assert_eq!(
            registry.register(descriptor("NES", &["fds"])).unwrap_err(),
            RegistryError::DuplicateSystem("nes".to_string())
        );
    }

    #[test]
    fn test_replace_and_unregister() {
        let mut registry = ModuleRegistry::builtin().unwrap();
        let mut nes = descriptor("nes", &["nes", "unf"]);
        nes.module_location = "/opt/cores/fceux.wasm".to_string();
        registry.replace(nes).unwrap();
        assert_eq!(registry.resolve("x.unf").unwrap().module_location, "/opt/cores/fceux.wasm");

        // A replacement that conflicts keeps the old descriptor in place
        let bad = descriptor("nes", &["gba"]);
        assert!(registry.replace(bad).is_err());
        assert_eq!(registry.resolve("x.unf").unwrap().system_id.as_str(), "nes");
        assert_eq!(registry.resolve("zelda.gba").unwrap().system_id.as_str(), "gba");
        assert_eq!(registry.len(), 9);

        registry.unregister(&SystemId::new("nes")).unwrap();
        assert!(registry.resolve("x.nes").is_err());
    }

    #[test]
    fn test_from_config_layers_systems() {
        let mut config = Config::default();
        config.systems.push(descriptor("lynx", &["lnx"]));
        let registry = ModuleRegistry::from_config(&config).unwrap();
        assert_eq!(registry.len(), 10);
        assert_eq!(registry.resolve("game.lnx").unwrap().system_id.as_str(), "lynx");
    }
}
