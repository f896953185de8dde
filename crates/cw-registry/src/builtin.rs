//! Built-in system table

use cw_core::system::DEFAULT_ASSET_OFFSET;
use cw_core::{ScreenGeometry, SystemDescriptor, SystemId};

/// Game Boy family refresh rate
pub const GB_FRAME_RATE_HZ: f64 = 59.7275;
/// NTSC NES refresh rate
pub const NES_FRAME_RATE_HZ: f64 = 60.0988;
/// NTSC SNES refresh rate
pub const SNES_FRAME_RATE_HZ: f64 = 60.098;
pub const N64_FRAME_RATE_HZ: f64 = 60.0;
pub const DS_FRAME_RATE_HZ: f64 = 59.8261;
pub const N3DS_FRAME_RATE_HZ: f64 = 59.8312;
pub const PS1_FRAME_RATE_HZ: f64 = 59.94;

struct Entry {
    id: &'static str,
    name: &'static str,
    extensions: &'static [&'static str],
    pages: u32,
    hz: f64,
    screen: ScreenGeometry,
    bottom: Option<ScreenGeometry>,
    firmware: Option<&'static str>,
}

const TABLE: &[Entry] = &[
    Entry {
        id: "gba",
        name: "Game Boy Advance",
        extensions: &["gba"],
        pages: 256,
        hz: GB_FRAME_RATE_HZ,
        screen: ScreenGeometry::new(240, 160),
        bottom: None,
        firmware: Some("gba_bios.bin"),
    },
    Entry {
        id: "gb",
        name: "Game Boy",
        extensions: &["gb"],
        pages: 256,
        hz: GB_FRAME_RATE_HZ,
        screen: ScreenGeometry::new(160, 144),
        bottom: None,
        firmware: Some("gb_bios.bin"),
    },
    Entry {
        id: "gbc",
        name: "Game Boy Color",
        extensions: &["gbc"],
        pages: 256,
        hz: GB_FRAME_RATE_HZ,
        screen: ScreenGeometry::new(160, 144),
        bottom: None,
        firmware: Some("gbc_bios.bin"),
    },
    Entry {
        id: "nes",
        name: "Nintendo Entertainment System",
        extensions: &["nes"],
        pages: 256,
        hz: NES_FRAME_RATE_HZ,
        screen: ScreenGeometry::new(256, 240),
        bottom: None,
        firmware: None,
    },
    Entry {
        id: "snes",
        name: "Super Nintendo",
        extensions: &["sfc", "smc"],
        pages: 256,
        hz: SNES_FRAME_RATE_HZ,
        screen: ScreenGeometry::new(256, 224),
        bottom: None,
        firmware: None,
    },
    Entry {
        id: "n64",
        name: "Nintendo 64",
        extensions: &["n64", "z64"],
        pages: 1024,
        hz: N64_FRAME_RATE_HZ,
        screen: ScreenGeometry::new(320, 240),
        bottom: None,
        firmware: None,
    },
    Entry {
        id: "ds",
        name: "Nintendo DS",
        extensions: &["nds"],
        pages: 512,
        hz: DS_FRAME_RATE_HZ,
        screen: ScreenGeometry::new(256, 192),
        bottom: Some(ScreenGeometry::new(256, 192)),
        firmware: Some("nds_bios.bin"),
    },
    Entry {
        id: "3ds",
        name: "Nintendo 3DS",
        extensions: &["3ds"],
        pages: 1024,
        hz: N3DS_FRAME_RATE_HZ,
        screen: ScreenGeometry::new(400, 240),
        bottom: Some(ScreenGeometry::new(320, 240)),
        firmware: None,
    },
    Entry {
        id: "ps1",
        name: "PlayStation",
        extensions: &["bin", "iso"],
        pages: 2048,
        hz: PS1_FRAME_RATE_HZ,
        screen: ScreenGeometry::new(320, 240),
        bottom: None,
        firmware: Some("ps1_bios.bin"),
    },
];

/// Descriptors for every system cartwheel knows out of the box
pub fn builtin_systems() -> Vec<SystemDescriptor> {
    TABLE
        .iter()
        .map(|e| SystemDescriptor {
            system_id: SystemId::new(e.id),
            name: e.name.to_string(),
            module_location: format!("{}.wasm", e.id),
            accepted_extensions: e.extensions.iter().map(|s| s.to_string()).collect(),
            initial_memory_pages: e.pages,
            frame_rate_hz: e.hz,
            screen: e.screen,
            secondary_screen: e.bottom,
            firmware_key: e.firmware.map(str::to_string),
            asset_offset: DEFAULT_ASSET_OFFSET,
        })
        .collect()
}
