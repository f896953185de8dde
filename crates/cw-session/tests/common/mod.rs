//! Fixture cores and helpers shared by the session tests

#![allow(dead_code)]

use async_trait::async_trait;
use cw_core::{ScreenGeometry, SessionError, SystemDescriptor, SystemId};
use cw_session::{FrameBufferSurface, MemoryModuleFetcher, ModuleFetcher, SurfaceBinding};
use tokio::sync::Notify;

/// Deterministic core: counts frames, bump-allocates from 4096, exposes the
/// counter as a 1x1 framebuffer (and twice the counter on the bottom screen)
/// and saves/restores the counter as 4 bytes of state.
pub const COUNTER_CORE: &str = r#"
(module
  (memory (export "memory") 2)
  (global $heap (mut i32) (i32.const 4096))
  (global $frames (mut i32) (i32.const 0))
  (global $asset (mut i32) (i32.const 0))

  (func (export "init"))

  (func (export "alloc") (param $len i32) (result i32)
    (local $ptr i32)
    (local.set $ptr (global.get $heap))
    (if (i32.gt_u (i32.add (local.get $ptr) (local.get $len)) (i32.const 131072))
      (then (return (i32.const 0))))
    (global.set $heap (i32.add (local.get $ptr) (local.get $len)))
    (local.get $ptr))

  (func (export "free") (param i32 i32))

  (func (export "start") (param $ptr i32) (param $len i32)
    (global.set $asset (local.get $ptr)))

  (func (export "frame")
    (global.set $frames (i32.add (global.get $frames) (i32.const 1))))

  (func (export "framebuffer") (result i32)
    (i32.store (i32.const 0) (global.get $frames))
    (i32.const 0))

  (func (export "framebuffer_bottom") (result i32)
    (i32.store (i32.const 8) (i32.mul (global.get $frames) (i32.const 2)))
    (i32.const 8))

  (func (export "state_size") (result i32) (i32.const 4))

  (func (export "save_state") (result i32)
    (i32.store (i32.const 16) (global.get $frames))
    (i32.const 16))

  (func (export "load_state") (param $ptr i32) (param $len i32) (result i32)
    (if (i32.ne (local.get $len) (i32.const 4))
      (then (return (i32.const 1))))
    (global.set $frames (i32.load (local.get $ptr)))
    (i32.const 0))

  (func (export "halt")))
"#;

/// Core without `alloc`: the host copies into fixed regions, and state is
/// written straight into the module's save buffer.
pub const FIXED_CORE: &str = r#"
(module
  (memory (export "memory") 1)
  (global $frames (mut i32) (i32.const 0))

  (func (export "init"))
  (func (export "frame")
    (global.set $frames (i32.add (global.get $frames) (i32.const 1))))
  (func (export "framebuffer") (result i32)
    (i32.store (i32.const 0) (global.get $frames))
    (i32.const 0))
  (func (export "state_size") (result i32) (i32.const 4))
  (func (export "save_state") (result i32)
    (i32.store (i32.const 32) (global.get $frames))
    (i32.const 32))
  (func (export "load_state") (param $ptr i32) (param $len i32) (result i32)
    (global.set $frames (i32.load (local.get $ptr)))
    (i32.const 0)))
"#;

/// Core without `alloc` whose live state is its save buffer; counters of
/// 1000 or more are refused on restore
pub const INPLACE_CORE: &str = r#"
(module
  (memory (export "memory") 1)
  (func (export "init"))
  (func (export "frame")
    (i32.store (i32.const 32) (i32.add (i32.load (i32.const 32)) (i32.const 1))))
  (func (export "state_size") (result i32) (i32.const 4))
  (func (export "save_state") (result i32) (i32.const 32))
  (func (export "load_state") (param $ptr i32) (param $len i32) (result i32)
    (i32.ge_u (i32.load (local.get $ptr)) (i32.const 1000))))
"#;

/// Core that traps on its third frame and cannot save state
pub const FAULTY_CORE: &str = r#"
(module
  (memory (export "memory") 1)
  (global $n (mut i32) (i32.const 0))
  (func (export "init"))
  (func (export "frame")
    (global.set $n (i32.add (global.get $n) (i32.const 1)))
    (if (i32.eq (global.get $n) (i32.const 3))
      (then unreachable))))
"#;

/// Core that expects firmware and refuses to start without it
pub const BIOS_CORE: &str = r#"
(module
  (memory (export "memory") 1)
  (global $bios (mut i32) (i32.const 0))
  (func (export "init"))
  (func (export "load_bios") (param $ptr i32) (param $len i32)
    (global.set $bios (i32.load8_u (local.get $ptr))))
  (func (export "start") (param i32 i32)
    (if (i32.eqz (global.get $bios)) (then unreachable)))
  (func (export "frame")))
"#;

/// Route test logs, guest console output included, through the test harness
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("cw_session=trace")
        .with_test_writer()
        .try_init();
}

pub fn descriptor(id: &str, location: &str, pages: u32) -> SystemDescriptor {
    SystemDescriptor {
        system_id: SystemId::new(id),
        name: id.to_uppercase(),
        module_location: location.to_string(),
        accepted_extensions: vec![id.to_string()],
        initial_memory_pages: pages,
        frame_rate_hz: 59.7275,
        screen: ScreenGeometry::new(1, 1),
        secondary_screen: None,
        firmware_key: None,
        asset_offset: 0x100,
    }
}

pub fn gba() -> SystemDescriptor {
    descriptor("gba", "gba.wasm", 2)
}

pub fn fetcher() -> MemoryModuleFetcher {
    MemoryModuleFetcher::new()
        .with("gba.wasm", COUNTER_CORE)
        .with("nes.wasm", COUNTER_CORE)
        .with("fixed.wasm", FIXED_CORE)
        .with("inplace.wasm", INPLACE_CORE)
        .with("faulty.wasm", FAULTY_CORE)
        .with("bios.wasm", BIOS_CORE)
}

pub fn display() -> (FrameBufferSurface, SurfaceBinding) {
    let surface = FrameBufferSurface::new();
    (surface.clone(), SurfaceBinding::new(surface))
}

/// Frame counter as presented by the counter cores
pub fn presented_counter(surface: &FrameBufferSurface) -> Option<u32> {
    let pixels = surface.pixels();
    let bytes: [u8; 4] = pixels.get(..4)?.try_into().ok()?;
    Some(u32::from_le_bytes(bytes))
}

/// Fetcher that parks until released, to hold a load in flight
pub struct GatedFetcher {
    pub entered: Notify,
    pub gate: Notify,
}

impl GatedFetcher {
    pub fn new() -> Self {
        Self {
            entered: Notify::new(),
            gate: Notify::new(),
        }
    }
}

#[async_trait]
impl ModuleFetcher for GatedFetcher {
    async fn fetch(&self, _location: &str) -> Result<Vec<u8>, SessionError> {
        self.entered.notify_one();
        self.gate.notified().await;
        Ok(COUNTER_CORE.as_bytes().to_vec())
    }
}

/// Fetcher that never completes
pub struct StalledFetcher;

#[async_trait]
impl ModuleFetcher for StalledFetcher {
    async fn fetch(&self, _location: &str) -> Result<Vec<u8>, SessionError> {
        std::future::pending().await
    }
}
