//! Static metadata for emulated systems

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Cadence used when a descriptor carries an unusable frame rate
pub const DEFAULT_FRAME_RATE_HZ: f64 = 60.0;

/// Default fixed offset for assets copied into modules without `alloc`
pub const DEFAULT_ASSET_OFFSET: u32 = 0x1_0000;

/// Size of one wasm linear memory page
pub const WASM_PAGE_SIZE: u64 = 0x1_0000;

/// System identifier (console tag), always lower case
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct SystemId(String);

impl SystemId {
    /// Create a system identifier, normalizing case
    pub fn new(id: &str) -> Self {
        Self(id.trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SystemId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SystemId {
    fn from(id: String) -> Self {
        Self::new(&id)
    }
}

impl From<SystemId> for String {
    fn from(id: SystemId) -> Self {
        id.0
    }
}

impl fmt::Display for SystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Dimensions of one emulated screen (RGBA8888)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenGeometry {
    pub width: u32,
    pub height: u32,
}

impl ScreenGeometry {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Byte length of one RGBA8888 frame
    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

/// Static description of one supported system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemDescriptor {
    /// Console tag, e.g. "gba"
    pub system_id: SystemId,
    /// Human readable name
    #[serde(default)]
    pub name: String,
    /// Where to fetch the binary module (relative paths resolve against the modules dir)
    pub module_location: String,
    /// File name suffixes (without the dot) routed to this system
    pub accepted_extensions: Vec<String>,
    /// Minimum linear memory reservation in wasm pages
    pub initial_memory_pages: u32,
    /// Native frame cadence
    pub frame_rate_hz: f64,
    /// Primary (top) screen
    pub screen: ScreenGeometry,
    /// Bottom screen on dual-screen hardware
    #[serde(default)]
    pub secondary_screen: Option<ScreenGeometry>,
    /// Store key of this system's firmware slot, e.g. "gba_bios.bin"
    #[serde(default)]
    pub firmware_key: Option<String>,
    /// Fixed copy-in location for modules without an allocator
    #[serde(default = "default_asset_offset")]
    pub asset_offset: u32,
}

fn default_asset_offset() -> u32 {
    DEFAULT_ASSET_OFFSET
}

impl SystemDescriptor {
    /// Interval between two frame advances at the native cadence
    pub fn frame_interval(&self) -> Duration {
        let hz = if self.frame_rate_hz.is_finite() && self.frame_rate_hz > 0.0 {
            self.frame_rate_hz
        } else {
            DEFAULT_FRAME_RATE_HZ
        };
        Duration::from_secs_f64(1.0 / hz)
    }

    pub fn is_dual_screen(&self) -> bool {
        self.secondary_screen.is_some()
    }

    /// Minimum linear memory size in bytes
    pub fn min_memory_bytes(&self) -> u64 {
        u64::from(self.initial_memory_pages) * WASM_PAGE_SIZE
    }

    /// Whether a file name's extension routes to this system
    pub fn accepts(&self, file_name: &str) -> bool {
        match crate::asset::file_extension(file_name) {
            Some(ext) => self
                .accepted_extensions
                .iter()
                .any(|e| e.trim().trim_start_matches('.').eq_ignore_ascii_case(&ext)),
            None => false,
        }
    }

    /// Whether a file name is this system's firmware slot
    pub fn is_firmware(&self, file_name: &str) -> bool {
        self.firmware_key
            .as_deref()
            .is_some_and(|key| key.trim().eq_ignore_ascii_case(file_name))
    }
}
