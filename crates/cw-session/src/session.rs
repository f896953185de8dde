//! Core session state machine
//!
//! One [`CoreSession`] pairs one instantiated module with one display
//! binding. It moves `Loaded -> Running -> Stopped`; a module fault in any
//! operation forces `Stopped`. `teardown` consumes the session and hands the
//! display binding back, so a torn-down session cannot be reused.

use crate::module::{GuestRegion, LoadStateOutcome, ModuleCapabilities, ModuleInstance, Screen};
use crate::scheduler::{FrameScheduler, FrameTicket, SessionId};
use crate::surface::SurfaceBinding;
use cw_core::config::RuntimeConfig;
use cw_core::{SessionError, SystemDescriptor, SystemId};
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Default bound on fetching a module binary
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No module instantiated
    Unloaded,
    /// Module instantiated, frame loop not started
    Loaded,
    /// Frame loop scheduled
    Running,
    /// Frame loop cancelled; terminal until teardown
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unloaded => "unloaded",
            Self::Loaded => "loaded",
            Self::Running => "running",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Settings scoped to one load
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub fetch_timeout: Duration,
    /// Firmware handed to the module right after instantiation
    pub firmware: Option<Vec<u8>>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            firmware: None,
        }
    }
}

impl SessionConfig {
    pub fn from_runtime(runtime: &RuntimeConfig) -> Self {
        Self {
            fetch_timeout: runtime.fetch_timeout(),
            firmware: None,
        }
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_firmware(mut self, firmware: Vec<u8>) -> Self {
        self.firmware = Some(firmware);
        self
    }
}

/// What a frame callback did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// One frame advanced and the next one was scheduled
    Advanced,
    /// Stale or cancelled ticket; nothing happened
    Ignored,
}

/// One instantiated module bound to a display
pub struct CoreSession {
    id: SessionId,
    descriptor: SystemDescriptor,
    module: ModuleInstance,
    surfaces: SurfaceBinding,
    asset: Option<GuestRegion>,
    state: SessionState,
    frame_token: Option<CancellationToken>,
    frames: u64,
}

impl fmt::Debug for CoreSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreSession")
            .field("id", &self.id)
            .field("system", &self.descriptor.system_id)
            .field("state", &self.state)
            .field("asset", &self.asset)
            .field("frames", &self.frames)
            .finish_non_exhaustive()
    }
}

impl CoreSession {
    /// Wrap an instantiated module; the session starts out `Loaded`
    pub fn new(
        id: SessionId,
        descriptor: SystemDescriptor,
        module: ModuleInstance,
        surfaces: SurfaceBinding,
    ) -> Self {
        info!(
            "Session {} loaded for '{}' ({:.4} Hz)",
            id, descriptor.system_id, descriptor.frame_rate_hz
        );
        Self {
            id,
            descriptor,
            module,
            surfaces,
            asset: None,
            state: SessionState::Loaded,
            frame_token: None,
            frames: 0,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn system_id(&self) -> &SystemId {
        &self.descriptor.system_id
    }

    pub fn descriptor(&self) -> &SystemDescriptor {
        &self.descriptor
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn capabilities(&self) -> ModuleCapabilities {
        self.module.capabilities()
    }

    /// Where the attached asset lives in module memory
    pub fn asset_region(&self) -> Option<GuestRegion> {
        self.asset
    }

    /// Frame advances since start
    pub fn frames_advanced(&self) -> u64 {
        self.frames
    }

    fn require(&self, op: &'static str, allowed: &[SessionState]) -> Result<(), SessionError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(SessionError::InvalidState {
                op,
                state: self.state.to_string(),
            })
        }
    }

    /// A module fault stops the session before it is reported
    fn check<T>(&mut self, result: Result<T, SessionError>) -> Result<T, SessionError> {
        if let Err(SessionError::ModuleFault(msg)) = &result {
            warn!("Session {} faulted: {}", self.id, msg);
            if let Some(token) = self.frame_token.take() {
                token.cancel();
            }
            self.state = SessionState::Stopped;
        }
        result
    }

    /// Hand firmware to the module's `load_bios` export.
    ///
    /// Returns `false` when the module takes no firmware.
    pub fn attach_firmware(&mut self, bytes: &[u8]) -> Result<bool, SessionError> {
        self.require("attach firmware", &[SessionState::Loaded])?;
        let offset = self.descriptor.asset_offset;
        let result = self.module.load_firmware(bytes, offset);
        let taken = self.check(result)?;
        if taken {
            info!("Session {}: firmware attached ({} bytes)", self.id, bytes.len());
        } else {
            debug!("Session {}: module takes no firmware, skipped", self.id);
        }
        Ok(taken)
    }

    /// Copy game bytes into module memory.
    ///
    /// On `AssetTooLarge` the session stays `Loaded` with no asset attached.
    pub fn attach_asset(&mut self, bytes: &[u8]) -> Result<(), SessionError> {
        self.require("attach asset", &[SessionState::Loaded])?;

        if let Some(previous) = self.asset.take() {
            let result = self.module.release(previous);
            self.check(result)?;
        }

        let offset = self.descriptor.asset_offset;
        let result = self.module.place(bytes, offset);
        let region = self.check(result)?;
        info!(
            "Session {}: asset attached at 0x{:x} ({} bytes)",
            self.id, region.ptr, region.len
        );
        self.asset = Some(region);
        Ok(())
    }

    /// Call the module entry point and schedule the first frame
    pub fn start(&mut self, scheduler: &mut dyn FrameScheduler) -> Result<(), SessionError> {
        self.require("start", &[SessionState::Loaded])?;
        let region = self.asset.ok_or_else(|| SessionError::InvalidState {
            op: "start",
            state: "loaded without an asset".to_string(),
        })?;

        let result = self.module.start(region);
        self.check(result)?;

        let token = CancellationToken::new();
        self.frame_token = Some(token.clone());
        self.state = SessionState::Running;
        scheduler.request_frame(
            self.descriptor.frame_interval(),
            FrameTicket::new(self.id, token),
        );
        info!("Session {} running", self.id);
        Ok(())
    }

    /// Frame callback: advance once, present, reschedule.
    ///
    /// Tickets for another session, cancelled tickets and callbacks that
    /// arrive when the session is not running are ignored.
    pub fn on_frame(
        &mut self,
        ticket: &FrameTicket,
        scheduler: &mut dyn FrameScheduler,
    ) -> Result<FrameOutcome, SessionError> {
        if ticket.session != self.id
            || ticket.is_cancelled()
            || self.state != SessionState::Running
        {
            trace!("Session {}: ignoring ticket for {}", self.id, ticket.session);
            return Ok(FrameOutcome::Ignored);
        }

        let result = self.module.frame();
        self.check(result)?;
        let result = self.present();
        self.check(result)?;
        self.frames += 1;
        trace!("Session {}: frame {}", self.id, self.frames);

        scheduler.request_frame(self.descriptor.frame_interval(), ticket.clone());
        Ok(FrameOutcome::Advanced)
    }

    fn present(&mut self) -> Result<(), SessionError> {
        let geometry = self.descriptor.screen;
        if let Some(pixels) = self.module.framebuffer(Screen::Primary, geometry)? {
            self.surfaces.primary.present(pixels, geometry);
        }

        if let (Some(geometry), Some(surface)) = (
            self.descriptor.secondary_screen,
            self.surfaces.secondary.as_mut(),
        ) {
            if let Some(pixels) = self.module.framebuffer(Screen::Secondary, geometry)? {
                surface.present(pixels, geometry);
            }
        }
        Ok(())
    }

    /// Cancel the frame loop and call the module's `halt` export.
    ///
    /// No frame advances after this returns. Stopping a stopped session is a no-op.
    pub fn stop(&mut self) -> Result<(), SessionError> {
        let was_running = match self.state {
            SessionState::Stopped | SessionState::Unloaded => return Ok(()),
            SessionState::Running => true,
            SessionState::Loaded => false,
        };

        if let Some(token) = self.frame_token.take() {
            token.cancel();
        }
        self.state = SessionState::Stopped;
        info!("Session {} stopped after {} frames", self.id, self.frames);

        if was_running {
            let result = self.module.halt();
            self.check(result)?;
        }
        Ok(())
    }

    /// Serialize module state; `Ok(None)` if the module cannot export it
    pub fn save_state(&mut self) -> Result<Option<Vec<u8>>, SessionError> {
        self.require("capture", &[SessionState::Loaded, SessionState::Running])?;
        let result = self.module.save_state();
        self.check(result)
    }

    /// Hand serialized state back to the module
    pub fn load_state(&mut self, bytes: &[u8]) -> Result<LoadStateOutcome, SessionError> {
        self.require("restore", &[SessionState::Loaded, SessionState::Running])?;
        let result = self.module.load_state(bytes);
        self.check(result)
    }

    /// Stop, free the asset, blank the display and release the module.
    ///
    /// Returns the display binding for the next session.
    pub fn teardown(mut self) -> SurfaceBinding {
        if let Err(e) = self.stop() {
            warn!("Session {}: halt failed during teardown: {}", self.id, e);
        }
        if let Some(region) = self.asset.take() {
            if let Err(e) = self.module.release(region) {
                warn!("Session {}: free failed during teardown: {}", self.id, e);
            }
        }

        let Self {
            id,
            module,
            mut surfaces,
            ..
        } = self;
        surfaces.clear();
        drop(module);
        info!("Session {} torn down", id);
        surfaces
    }
}
