//! Capture/restore behaviour against fixture cores

mod common;

use common::*;
use cw_core::{CartwheelError, SessionError, SnapshotError, SystemId};
use cw_session::{ManualScheduler, SessionConfig, SessionSlot, SessionState, Snapshot};

async fn running_slot(location: &str, id: &str, frames: usize) -> (SessionSlot, ManualScheduler) {
    let scheduler = ManualScheduler::new();
    let (_surface, binding) = display();
    let slot = SessionSlot::new("snap", binding, scheduler.clone());
    slot.load(&fetcher(), &descriptor(id, location, 2), SessionConfig::default())
        .await
        .unwrap();
    slot.attach_asset(&[0xFF; 128]).unwrap();
    slot.start().unwrap();
    advance(&slot, &scheduler, frames);
    (slot, scheduler)
}

fn advance(slot: &SessionSlot, scheduler: &ManualScheduler, frames: usize) {
    for _ in 0..frames {
        let ticket = scheduler.pop().unwrap().ticket;
        slot.on_frame(&ticket).unwrap();
    }
}

fn counter(snapshot: &Snapshot) -> u32 {
    u32::from_le_bytes(snapshot.bytes[..4].try_into().unwrap())
}

#[tokio::test]
async fn test_capture_restore_is_idempotent() {
    let (slot, scheduler) = running_slot("gba.wasm", "gba", 3).await;
    let snapshot = slot.capture().unwrap();
    assert_eq!(snapshot.system_id, SystemId::new("gba"));
    assert_eq!(snapshot.bytes, 3u32.to_le_bytes());

    // Restoring right away changes nothing about what comes next
    slot.restore(&snapshot).unwrap();
    advance(&slot, &scheduler, 1);
    assert_eq!(counter(&slot.capture().unwrap()), 4);

    // Running ahead and restoring lands back on the captured point
    advance(&slot, &scheduler, 5);
    slot.restore(&snapshot).unwrap();
    advance(&slot, &scheduler, 1);
    assert_eq!(counter(&slot.capture().unwrap()), 4);
    assert_eq!(slot.state(), SessionState::Running);
}

#[tokio::test]
async fn test_restore_rejects_other_system() {
    let (slot, _scheduler) = running_slot("gba.wasm", "gba", 2).await;
    let foreign = Snapshot::new(SystemId::new("nes"), 9u32.to_le_bytes().to_vec());

    let err = slot.restore(&foreign).unwrap_err();
    assert!(matches!(
        err,
        CartwheelError::Snapshot(SnapshotError::SystemMismatch { ref expected, ref found })
            if expected == "gba" && found == "nes"
    ));
    assert_eq!(slot.state(), SessionState::Running);
    assert_eq!(counter(&slot.capture().unwrap()), 2);
}

#[tokio::test]
async fn test_restore_rejects_wrong_length() {
    let (slot, _scheduler) = running_slot("gba.wasm", "gba", 2).await;
    let short = Snapshot::new(SystemId::new("gba"), vec![1, 2, 3]);

    let err = slot.restore(&short).unwrap_err();
    assert!(matches!(err, CartwheelError::Snapshot(SnapshotError::CorruptSnapshot(_))));
    assert_eq!(slot.state(), SessionState::Running);
    assert_eq!(counter(&slot.capture().unwrap()), 2);
}

#[tokio::test]
async fn test_restore_without_alloc_uses_state_buffer() {
    let (slot, scheduler) = running_slot("fixed.wasm", "fixed", 4).await;
    let snapshot = slot.capture().unwrap();
    assert_eq!(counter(&snapshot), 4);

    advance(&slot, &scheduler, 3);
    slot.restore(&snapshot).unwrap();
    assert_eq!(counter(&slot.capture().unwrap()), 4);

    // The state buffer fixes the length
    let err = slot
        .restore(&Snapshot::new(SystemId::new("fixed"), vec![0; 8]))
        .unwrap_err();
    assert!(matches!(err, CartwheelError::Snapshot(SnapshotError::CorruptSnapshot(_))));
}

#[tokio::test]
async fn test_rejected_restore_without_alloc_keeps_state() {
    let (slot, scheduler) = running_slot("inplace.wasm", "inplace", 3).await;
    let before = slot.capture().unwrap();
    assert_eq!(counter(&before), 3);

    let refused = Snapshot::new(SystemId::new("inplace"), 5000u32.to_le_bytes().to_vec());
    let err = slot.restore(&refused).unwrap_err();
    assert!(matches!(err, CartwheelError::Snapshot(SnapshotError::CorruptSnapshot(_))));
    assert_eq!(slot.capture().unwrap(), before);
    assert_eq!(slot.state(), SessionState::Running);

    advance(&slot, &scheduler, 1);
    assert_eq!(counter(&slot.capture().unwrap()), 4);

    // An accepted restore still lands in place
    slot.restore(&Snapshot::new(SystemId::new("inplace"), 42u32.to_le_bytes().to_vec()))
        .unwrap();
    assert_eq!(counter(&slot.capture().unwrap()), 42);
}

#[tokio::test]
async fn test_capture_unavailable() {
    let (slot, _scheduler) = running_slot("faulty.wasm", "faulty", 1).await;
    let err = slot.capture().unwrap_err();
    assert!(matches!(
        err,
        CartwheelError::Snapshot(SnapshotError::CaptureUnavailable(ref system)) if system == "faulty"
    ));
}

#[tokio::test]
async fn test_capture_requires_live_session() {
    let (slot, _scheduler) = running_slot("gba.wasm", "gba", 1).await;
    slot.stop().unwrap();
    assert!(matches!(
        slot.capture().unwrap_err(),
        CartwheelError::Session(SessionError::InvalidState { op: "capture", .. })
    ));

    slot.teardown();
    assert!(matches!(
        slot.capture().unwrap_err(),
        CartwheelError::Session(SessionError::NoActiveSession)
    ));
}
