//! Display surfaces
//!
//! A surface is the sink a running session presents its framebuffer into.
//! The presentation layer itself lives outside this crate; what it hands
//! in is anything implementing [`DisplaySurface`].

use cw_core::ScreenGeometry;
use parking_lot::Mutex;
use std::sync::Arc;

/// Target a session presents frames into
pub trait DisplaySurface: Send {
    /// Present one RGBA8888 frame of the given geometry
    fn present(&mut self, pixels: &[u8], geometry: ScreenGeometry);

    /// Blank the surface; called when a session detaches
    fn clear(&mut self);
}

#[derive(Debug, Default)]
struct FrameBufferInner {
    pixels: Vec<u8>,
    geometry: Option<ScreenGeometry>,
    presented: u64,
}

/// Surface that keeps the last presented frame in memory.
///
/// Clones share the same buffer, so one handle can be bound to a session
/// while another reads frames back out.
#[derive(Debug, Clone, Default)]
pub struct FrameBufferSurface {
    inner: Arc<Mutex<FrameBufferInner>>,
}

impl FrameBufferSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the last presented frame
    pub fn pixels(&self) -> Vec<u8> {
        self.inner.lock().pixels.clone()
    }

    pub fn geometry(&self) -> Option<ScreenGeometry> {
        self.inner.lock().geometry
    }

    /// Number of frames presented since creation
    pub fn presented(&self) -> u64 {
        self.inner.lock().presented
    }
}

impl DisplaySurface for FrameBufferSurface {
    fn present(&mut self, pixels: &[u8], geometry: ScreenGeometry) {
        let mut inner = self.inner.lock();
        inner.pixels.clear();
        inner.pixels.extend_from_slice(pixels);
        inner.geometry = Some(geometry);
        inner.presented += 1;
    }

    fn clear(&mut self) {
        let mut inner = self.inner.lock();
        inner.pixels.clear();
        inner.geometry = None;
    }
}

/// Surface that discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSurface;

impl DisplaySurface for NullSurface {
    fn present(&mut self, _pixels: &[u8], _geometry: ScreenGeometry) {}

    fn clear(&mut self) {}
}

/// Primary surface plus the bottom screen for dual-screen systems
pub struct SurfaceBinding {
    pub primary: Box<dyn DisplaySurface>,
    pub secondary: Option<Box<dyn DisplaySurface>>,
}

impl SurfaceBinding {
    pub fn new(primary: impl DisplaySurface + 'static) -> Self {
        Self {
            primary: Box::new(primary),
            secondary: None,
        }
    }

    pub fn with_secondary(mut self, secondary: impl DisplaySurface + 'static) -> Self {
        self.secondary = Some(Box::new(secondary));
        self
    }

    /// Binding that presents nowhere
    pub fn headless() -> Self {
        Self::new(NullSurface)
    }

    pub fn clear(&mut self) {
        self.primary.clear();
        if let Some(secondary) = self.secondary.as_mut() {
            secondary.clear();
        }
    }
}

impl std::fmt::Debug for SurfaceBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurfaceBinding")
            .field("secondary", &self.secondary.is_some())
            .finish_non_exhaustive()
    }
}
