//! The active-session slot of one display
//!
//! A [`SessionSlot`] owns a display binding and at most one [`CoreSession`].
//! Loading tears the previous session down before anything else happens.
//! Every load and teardown bumps a generation counter; a load that wakes up
//! from its fetch to find the generation moved on discards its result.

use crate::fetch::{fetch_module, ModuleFetcher};
use crate::module::{compile, ModuleInstance};
use crate::scheduler::{FrameScheduler, FrameTicket, SessionId};
use crate::session::{CoreSession, FrameOutcome, SessionConfig, SessionState};
use crate::snapshot::{self, Snapshot};
use crate::surface::SurfaceBinding;
use cw_core::{SessionError, SystemDescriptor, SystemId};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};
use wasmtime::Engine;

struct SlotInner {
    label: String,
    engine: Engine,
    scheduler: Box<dyn FrameScheduler>,
    /// Display binding while no session holds it
    idle_surfaces: Option<SurfaceBinding>,
    active: Option<CoreSession>,
    generation: u64,
    next_session: u64,
}

impl SlotInner {
    fn teardown_active(&mut self) -> bool {
        match self.active.take() {
            Some(session) => {
                self.idle_surfaces = Some(session.teardown());
                true
            }
            None => false,
        }
    }

    fn active_mut(&mut self) -> Result<&mut CoreSession, SessionError> {
        self.active.as_mut().ok_or(SessionError::NoActiveSession)
    }
}

/// Single-occupancy session holder for one display
#[derive(Clone)]
pub struct SessionSlot {
    inner: Arc<Mutex<SlotInner>>,
}

impl std::fmt::Debug for SessionSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("SessionSlot")
            .field("label", &inner.label)
            .field("active", &inner.active)
            .field("generation", &inner.generation)
            .finish_non_exhaustive()
    }
}

impl SessionSlot {
    pub fn new(
        label: impl Into<String>,
        surfaces: SurfaceBinding,
        scheduler: impl FrameScheduler + 'static,
    ) -> Self {
        Self::with_engine(label, surfaces, scheduler, Engine::default())
    }

    pub fn with_engine(
        label: impl Into<String>,
        surfaces: SurfaceBinding,
        scheduler: impl FrameScheduler + 'static,
        engine: Engine,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SlotInner {
                label: label.into(),
                engine,
                scheduler: Box::new(scheduler),
                idle_surfaces: Some(surfaces),
                active: None,
                generation: 0,
                next_session: 0,
            })),
        }
    }

    pub fn label(&self) -> String {
        self.inner.lock().label.clone()
    }

    /// Tear down whatever is active, then fetch, instantiate and bind a new module.
    ///
    /// On any failure the slot is left empty. Returns [`SessionError::Superseded`]
    /// if another load or a teardown happened while the fetch was in flight.
    pub async fn load(
        &self,
        fetcher: &dyn ModuleFetcher,
        descriptor: &SystemDescriptor,
        config: SessionConfig,
    ) -> Result<SessionId, SessionError> {
        let (generation, engine) = {
            let mut inner = self.inner.lock();
            inner.teardown_active();
            inner.generation += 1;
            info!(
                "[{}] Loading '{}' (generation {})",
                inner.label, descriptor.system_id, inner.generation
            );
            (inner.generation, inner.engine.clone())
        };

        let bytes = fetch_module(fetcher, descriptor, config.fetch_timeout).await?;
        let module = compile(&engine, &bytes)?;

        let mut inner = self.inner.lock();
        if inner.generation != generation {
            info!(
                "[{}] Load of '{}' superseded (generation {} -> {})",
                inner.label, descriptor.system_id, generation, inner.generation
            );
            return Err(SessionError::Superseded);
        }
        let instance = ModuleInstance::instantiate(&inner.engine, &module, descriptor)?;
        let surfaces = inner.idle_surfaces.take().ok_or_else(|| SessionError::InvalidState {
            op: "load",
            state: "display already bound".to_string(),
        })?;

        inner.next_session += 1;
        let id = SessionId(inner.next_session);
        let mut session = CoreSession::new(id, descriptor.clone(), instance, surfaces);

        if let Some(firmware) = config.firmware.as_deref() {
            if let Err(e) = session.attach_firmware(firmware) {
                inner.idle_surfaces = Some(session.teardown());
                return Err(e);
            }
        }

        inner.active = Some(session);
        Ok(id)
    }

    /// Tear down the active session, if any, and invalidate in-flight loads
    pub fn teardown(&self) -> bool {
        let mut inner = self.inner.lock();
        inner.generation += 1;
        let torn_down = inner.teardown_active();
        debug!(
            "[{}] Teardown (generation {}, had session: {})",
            inner.label, inner.generation, torn_down
        );
        torn_down
    }

    pub fn attach_asset(&self, bytes: &[u8]) -> Result<(), SessionError> {
        self.inner.lock().active_mut()?.attach_asset(bytes)
    }

    pub fn start(&self) -> Result<(), SessionError> {
        let mut inner = self.inner.lock();
        let SlotInner {
            active, scheduler, ..
        } = &mut *inner;
        active
            .as_mut()
            .ok_or(SessionError::NoActiveSession)?
            .start(scheduler.as_mut())
    }

    pub fn stop(&self) -> Result<(), SessionError> {
        self.inner.lock().active_mut()?.stop()
    }

    /// Deliver a frame callback; tickets of sessions no longer here are ignored
    pub fn on_frame(&self, ticket: &FrameTicket) -> Result<FrameOutcome, SessionError> {
        let mut inner = self.inner.lock();
        let SlotInner {
            active, scheduler, ..
        } = &mut *inner;
        match active.as_mut() {
            Some(session) => session.on_frame(ticket, scheduler.as_mut()),
            None => Ok(FrameOutcome::Ignored),
        }
    }

    /// Capture the active session's state
    pub fn capture(&self) -> cw_core::Result<Snapshot> {
        let mut inner = self.inner.lock();
        snapshot::capture(inner.active_mut()?)
    }

    /// Restore a snapshot into the active session
    pub fn restore(&self, snapshot: &Snapshot) -> cw_core::Result<()> {
        let mut inner = self.inner.lock();
        snapshot::restore(inner.active_mut()?, snapshot)
    }

    pub fn state(&self) -> SessionState {
        self.inner
            .lock()
            .active
            .as_ref()
            .map_or(SessionState::Unloaded, CoreSession::state)
    }

    pub fn active_id(&self) -> Option<SessionId> {
        self.inner.lock().active.as_ref().map(CoreSession::id)
    }

    pub fn active_system(&self) -> Option<SystemId> {
        self.inner
            .lock()
            .active
            .as_ref()
            .map(|s| s.system_id().clone())
    }

    pub fn frames_advanced(&self) -> u64 {
        self.inner
            .lock()
            .active
            .as_ref()
            .map_or(0, CoreSession::frames_advanced)
    }

    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    /// Run `f` against the active session
    pub fn with_session<R>(
        &self,
        f: impl FnOnce(&mut CoreSession) -> R,
    ) -> Result<R, SessionError> {
        let mut inner = self.inner.lock();
        Ok(f(inner.active_mut()?))
    }
}
