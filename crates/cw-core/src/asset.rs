//! Asset classification helpers

use crate::system::SystemId;
use serde::{Deserialize, Serialize};

/// What a stored asset is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssetKind {
    /// Game image
    Game,
    /// Firmware (BIOS) image
    Firmware,
}

/// Asset kind together with the system it routes to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetClass {
    pub kind: AssetKind,
    pub system_id: SystemId,
}

/// Lower-cased text after the last dot, if any
pub fn file_extension(name: &str) -> Option<String> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
