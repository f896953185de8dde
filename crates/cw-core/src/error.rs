//! Error types for cartwheel

use thiserror::Error;

/// Main error type for cartwheel
#[derive(Error, Debug)]
pub enum CartwheelError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Asset not found: {0}")]
    AssetNotFound(String),
}

/// Blob store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store I/O failed for '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid key '{0}': keys are plain file names")]
    InvalidKey(String),

    #[error("Invalid namespace '{0}'")]
    InvalidNamespace(String),
}

impl StoreError {
    /// Wrap an I/O failure with the key it happened on
    pub fn io(key: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            key: key.into(),
            source,
        }
    }
}

/// Module registry errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Unsupported asset kind: {0}")]
    UnsupportedAssetKind(String),

    #[error("Unknown system: {0}")]
    UnknownSystem(String),

    #[error("Extension '.{extension}' claimed by both '{existing}' and '{incoming}'")]
    ExtensionConflict {
        extension: String,
        existing: String,
        incoming: String,
    },

    #[error("Firmware key '{key}' claimed by both '{existing}' and '{incoming}'")]
    FirmwareConflict {
        key: String,
        existing: String,
        incoming: String,
    },

    #[error("System '{0}' is already registered")]
    DuplicateSystem(String),
}

/// Core session errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Module load failed: {0}")]
    ModuleLoad(String),

    #[error("Module fetch for '{system}' timed out after {timeout_ms}ms")]
    FetchTimeout { system: String, timeout_ms: u64 },

    #[error("Asset of {len} bytes does not fit in module memory")]
    AssetTooLarge { len: usize },

    #[error("Module fault: {0}")]
    ModuleFault(String),

    #[error("Cannot {op} while session is {state}")]
    InvalidState { op: &'static str, state: String },

    #[error("Load was superseded by a newer request")]
    Superseded,

    #[error("No active session")]
    NoActiveSession,
}

impl SessionError {
    /// Whether this error means the module could not be brought up at all
    pub fn is_load_failure(&self) -> bool {
        matches!(self, Self::ModuleLoad(_) | Self::FetchTimeout { .. })
    }
}

/// Snapshot codec errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("Module for '{0}' cannot export its state")]
    CaptureUnavailable(String),

    #[error("Snapshot belongs to '{found}', session runs '{expected}'")]
    SystemMismatch { expected: String, found: String },

    #[error("Corrupt snapshot: {0}")]
    CorruptSnapshot(String),
}

/// Result type alias for cartwheel operations
pub type Result<T> = std::result::Result<T, CartwheelError>;
