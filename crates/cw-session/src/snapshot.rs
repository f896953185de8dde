//! Snapshot codec
//!
//! Snapshots are the module's own bytes, copied out of and back into linear
//! memory without interpretation. The only thing the host adds is the
//! system id, kept next to the bytes so a snapshot never lands in a module
//! of another system.

use crate::module::LoadStateOutcome;
use crate::session::CoreSession;
use cw_core::{SnapshotError, SystemId};
use tracing::info;

/// File suffix of stored save states
pub const STATE_SUFFIX: &str = "state";

/// Captured execution state of one module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub system_id: SystemId,
    pub bytes: Vec<u8>,
}

impl Snapshot {
    pub fn new(system_id: SystemId, bytes: Vec<u8>) -> Self {
        Self { system_id, bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Copy the session's state out of the module
pub fn capture(session: &mut CoreSession) -> cw_core::Result<Snapshot> {
    let system = session.system_id().clone();
    match session.save_state()? {
        Some(bytes) => {
            info!(
                "Session {}: captured {} bytes of '{}' state",
                session.id(),
                bytes.len(),
                system
            );
            Ok(Snapshot::new(system, bytes))
        }
        None => Err(SnapshotError::CaptureUnavailable(system.to_string()).into()),
    }
}

/// Feed a snapshot back into the session's module.
///
/// A snapshot of another system, or bytes the module rejects, leave the
/// session as it was.
pub fn restore(session: &mut CoreSession, snapshot: &Snapshot) -> cw_core::Result<()> {
    if snapshot.system_id != *session.system_id() {
        return Err(SnapshotError::SystemMismatch {
            expected: session.system_id().to_string(),
            found: snapshot.system_id.to_string(),
        }
        .into());
    }

    match session.load_state(&snapshot.bytes)? {
        LoadStateOutcome::Restored => {
            info!(
                "Session {}: restored {} bytes of '{}' state",
                session.id(),
                snapshot.len(),
                snapshot.system_id
            );
            Ok(())
        }
        LoadStateOutcome::Rejected => Err(SnapshotError::CorruptSnapshot(format!(
            "module rejected {} bytes",
            snapshot.len()
        ))
        .into()),
        LoadStateOutcome::Unsupported => {
            Err(SnapshotError::CaptureUnavailable(snapshot.system_id.to_string()).into())
        }
    }
}

/// Store key of the save state for `asset_name` on `system`.
///
/// The full asset name is kept so `chrono.sfc` and `chrono.smc` get
/// separate slots.
pub fn state_key(asset_name: &str, system: &SystemId) -> String {
    format!("{asset_name}.{system}.{STATE_SUFFIX}")
}

/// Split a save-state key into asset name and system
pub fn parse_state_key(key: &str) -> Option<(&str, SystemId)> {
    let rest = key.strip_suffix(STATE_SUFFIX)?.strip_suffix('.')?;
    let (asset_name, system) = rest.rsplit_once('.')?;
    if asset_name.is_empty() || system.is_empty() {
        return None;
    }
    Some((asset_name, SystemId::new(system)))
}
