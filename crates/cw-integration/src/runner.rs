//! Emulator runner
//!
//! Sequences the library, the registry and the session slot:
//! resolve -> read asset and firmware -> load -> attach -> start, and the
//! save-state round trips through the store. The runner either owns a
//! manual frame clock (headless stepping) or feeds a [`FrameDriver`] that
//! runs frames in real time.

use crate::library::Library;
use cw_core::{AssetKind, CartwheelError, Config, RegistryError, Result, SessionError, SystemId};
use cw_session::snapshot::state_key;
use cw_session::{
    FrameDriver, FrameOutcome, ManualScheduler, ModuleFetcher, SessionConfig, SessionId,
    SessionSlot, SessionState, Snapshot, SurfaceBinding, TokioScheduler,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Label of the slot bound to the main display
pub const MAIN_DISPLAY: &str = "main";

enum Clock {
    /// Frames fire only when stepped
    Manual(ManualScheduler),
    /// A [`FrameDriver`] fires frames on the tokio timer
    RealTime,
}

/// Ties the library to one display's session slot
pub struct EmulatorRunner {
    library: Library,
    fetcher: Arc<dyn ModuleFetcher>,
    slot: SessionSlot,
    clock: Clock,
    session_config: SessionConfig,
    start_on_load: bool,
    /// Asset the active session was started with
    current: Option<String>,
}

impl EmulatorRunner {
    /// Runner whose frames are advanced by [`Self::step`]
    pub fn headless(
        library: Library,
        fetcher: Arc<dyn ModuleFetcher>,
        surfaces: SurfaceBinding,
        config: &Config,
    ) -> Self {
        let scheduler = ManualScheduler::new();
        let slot = SessionSlot::new(MAIN_DISPLAY, surfaces, scheduler.clone());
        Self::with_slot(library, fetcher, slot, Clock::Manual(scheduler), config)
    }

    /// Runner driven in real time; spawn the returned driver on the runtime
    pub fn realtime(
        library: Library,
        fetcher: Arc<dyn ModuleFetcher>,
        surfaces: SurfaceBinding,
        config: &Config,
    ) -> (Self, FrameDriver) {
        let (scheduler, rx) = TokioScheduler::channel();
        let slot = SessionSlot::new(MAIN_DISPLAY, surfaces, scheduler);
        let driver = FrameDriver::new(rx, slot.clone());
        (
            Self::with_slot(library, fetcher, slot, Clock::RealTime, config),
            driver,
        )
    }

    fn with_slot(
        library: Library,
        fetcher: Arc<dyn ModuleFetcher>,
        slot: SessionSlot,
        clock: Clock,
        config: &Config,
    ) -> Self {
        Self {
            library,
            fetcher,
            slot,
            clock,
            session_config: SessionConfig::from_runtime(&config.runtime),
            start_on_load: config.general.start_on_load,
            current: None,
        }
    }

    pub fn library(&self) -> &Library {
        &self.library
    }

    pub fn slot(&self) -> &SessionSlot {
        &self.slot
    }

    pub fn state(&self) -> SessionState {
        self.slot.state()
    }

    pub fn frames_advanced(&self) -> u64 {
        self.slot.frames_advanced()
    }

    /// Asset the active session was started with
    pub fn current_asset(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Bring up a session for a stored game.
    ///
    /// Names that route to no system, missing assets and firmware images are
    /// rejected before the active session is touched. The session is started
    /// right away unless `start_on_load` is off.
    pub async fn start(&mut self, name: &str) -> Result<SessionId> {
        let descriptor = self.library.resolve(name)?.clone();
        let asset = self.library.get(name).await?;
        if asset.kind() != AssetKind::Game {
            return Err(RegistryError::UnsupportedAssetKind(format!(
                "'{name}' is firmware, not a game"
            ))
            .into());
        }

        let mut config = self.session_config.clone();
        if let Some(firmware) = self.library.firmware_for(&descriptor.system_id).await? {
            debug!("Using stored firmware for '{}'", descriptor.system_id);
            config = config.with_firmware(firmware);
        }

        self.current = None;
        let id = self
            .slot
            .load(self.fetcher.as_ref(), &descriptor, config)
            .await?;
        self.current = Some(name.to_string());
        self.slot.attach_asset(&asset.bytes)?;

        if self.start_on_load {
            self.slot.start()?;
        }
        info!("Started '{}' on '{}' as session {}", name, descriptor.system_id, id);
        Ok(id)
    }

    /// Start a session that was loaded with `start_on_load` off
    pub fn resume(&self) -> Result<()> {
        Ok(self.slot.start()?)
    }

    /// Stop the frame loop; the session stays inspectable until closed
    pub fn stop(&self) -> Result<()> {
        Ok(self.slot.stop()?)
    }

    /// Tear the active session down and release the display
    pub fn close(&mut self) {
        if self.slot.teardown() {
            info!("Closed session for '{}'", self.current.as_deref().unwrap_or("?"));
        }
        self.current = None;
    }

    /// Fire up to `frames` queued callbacks of a headless runner.
    ///
    /// Returns the number of frames actually advanced, which is lower when
    /// the session stops along the way.
    pub fn step(&self, frames: u64) -> Result<u64> {
        let Clock::Manual(scheduler) = &self.clock else {
            return Err(SessionError::InvalidState {
                op: "step",
                state: "driven in real time".to_string(),
            }
            .into());
        };

        let mut advanced = 0;
        while advanced < frames {
            let Some(pending) = scheduler.pop() else {
                break;
            };
            if self.slot.on_frame(&pending.ticket)? == FrameOutcome::Advanced {
                advanced += 1;
            }
        }
        Ok(advanced)
    }

    fn active(&self) -> Result<(&str, SystemId)> {
        match (self.current.as_deref(), self.slot.active_system()) {
            (Some(name), Some(system)) => Ok((name, system)),
            _ => Err(SessionError::NoActiveSession.into()),
        }
    }

    /// Capture the active session into its asset's state slot
    pub async fn save_state(&self) -> Result<String> {
        let (name, _) = self.active()?;
        let snapshot = self.slot.capture()?;
        self.library.put_state(name, &snapshot).await
    }

    /// Restore the active session from its asset's state slot
    pub async fn load_state(&self) -> Result<()> {
        let (name, system) = self.active()?;
        let snapshot = self
            .library
            .get_state(name, &system)
            .await?
            .ok_or_else(|| CartwheelError::AssetNotFound(state_key(name, &system)))?;
        self.slot.restore(&snapshot)
    }

    /// Capture the active session straight into a host file
    pub async fn export_state(&self, dest: &Path) -> Result<Snapshot> {
        self.active()?;
        let snapshot = self.slot.capture()?;
        tokio::fs::write(dest, &snapshot.bytes).await?;
        info!("Exported {} bytes of state to {}", snapshot.len(), dest.display());
        Ok(snapshot)
    }

    /// Restore the active session from a host file captured on `system`
    pub async fn import_state(&self, path: &Path, system: &str) -> Result<()> {
        self.active()?;
        let snapshot = self.library.read_state_file(path, system).await?;
        self.slot.restore(&snapshot)
    }
}
