//! Core session runtime for cartwheel
//!
//! Hosts one sandboxed wasm emulation module per display: fetching and
//! instantiating it, copying game bytes into its memory, driving its frame
//! loop through a host scheduler and moving its opaque state in and out.

pub mod fetch;
pub mod module;
pub mod scheduler;
pub mod session;
pub mod slot;
pub mod snapshot;
pub mod surface;

pub use fetch::{fetch_module, FsModuleFetcher, MemoryModuleFetcher, ModuleFetcher};
pub use module::{GuestRegion, LoadStateOutcome, ModuleCapabilities, ModuleInstance};
pub use scheduler::{
    FrameDriver, FrameScheduler, FrameTicket, ManualScheduler, PendingFrame, SessionId,
    TokioScheduler,
};
pub use session::{CoreSession, FrameOutcome, SessionConfig, SessionState};
pub use slot::SessionSlot;
pub use snapshot::{parse_state_key, state_key, Snapshot};
pub use surface::{DisplaySurface, FrameBufferSurface, NullSurface, SurfaceBinding};
