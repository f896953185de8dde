//! Configuration system for cartwheel

use crate::system::SystemDescriptor;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub paths: PathConfig,
    pub store: StoreConfig,
    pub runtime: RuntimeConfig,
    pub debug: DebugConfig,
    /// Extra or overriding system descriptors
    pub systems: Vec<SystemDescriptor>,
}

/// General settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// System used when a name alone cannot decide
    pub default_system: Option<String>,
    /// Start the frame loop as soon as the asset is attached
    pub start_on_load: bool,
}

/// Path configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    /// Root of all blob store namespaces
    pub data_dir: PathBuf,
    /// Base directory for relative module locations
    pub modules_dir: PathBuf,
}

/// Blob store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub namespace: String,
}

/// Module runtime settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Upper bound for fetching one module binary
    pub fetch_timeout_ms: u64,
}

/// Debug settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DebugConfig {
    pub log_level: LogLevel,
}

/// Logging level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            default_system: None,
            start_on_load: true,
        }
    }
}

impl Default for PathConfig {
    fn default() -> Self {
        let base = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cartwheel");

        Self {
            data_dir: base.join("stores"),
            modules_dir: base.join("cores"),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            namespace: "library".to_string(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_ms: 10_000,
        }
    }
}

impl RuntimeConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

impl Config {
    /// Load configuration from the default location, or create it if it doesn't exist
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from a specific file, writing defaults if it is missing
    pub fn load_from(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            let config = Self::default();
            config.save_to(path)?;
            tracing::info!("Wrote default configuration to {}", path.display());
            Ok(config)
        }
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to a specific file
    pub fn save_to(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the path to the configuration file
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cartwheel")
            .join("config.toml")
    }
}
