//! Frame scheduling
//!
//! A running session never loops on its own. After every frame it asks a
//! [`FrameScheduler`] to call back after one frame interval, handing over a
//! [`FrameTicket`]. The ticket carries a cancellation token that `stop` and
//! `teardown` cancel, so a callback the host still has queued is inert.

use crate::slot::SessionSlot;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Identity of one session within a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Permission for one frame callback
#[derive(Debug, Clone)]
pub struct FrameTicket {
    pub session: SessionId,
    pub token: CancellationToken,
}

impl FrameTicket {
    pub fn new(session: SessionId, token: CancellationToken) -> Self {
        Self { session, token }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Host timing facility
pub trait FrameScheduler: Send {
    /// Arrange for `ticket` to be handed back after `delay`
    fn request_frame(&mut self, delay: Duration, ticket: FrameTicket);
}

/// A callback waiting to fire
#[derive(Debug, Clone)]
pub struct PendingFrame {
    pub delay: Duration,
    pub ticket: FrameTicket,
}

/// Scheduler whose queue is drained by hand.
///
/// Clones share one queue: bind one handle to a slot and pop callbacks from
/// another. Delays are recorded but not waited on.
#[derive(Debug, Clone, Default)]
pub struct ManualScheduler {
    queue: Arc<Mutex<VecDeque<PendingFrame>>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the oldest queued callback
    pub fn pop(&self) -> Option<PendingFrame> {
        self.queue.lock().pop_front()
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Drop every queued callback without firing it
    pub fn clear(&self) {
        self.queue.lock().clear();
    }
}

impl FrameScheduler for ManualScheduler {
    fn request_frame(&mut self, delay: Duration, ticket: FrameTicket) {
        trace!("Queued frame for session {} in {:?}", ticket.session, delay);
        self.queue.lock().push_back(PendingFrame { delay, ticket });
    }
}

/// Real-time scheduler backed by a tokio channel; paired with a [`FrameDriver`]
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    tx: mpsc::UnboundedSender<PendingFrame>,
}

impl TokioScheduler {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<PendingFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl FrameScheduler for TokioScheduler {
    fn request_frame(&mut self, delay: Duration, ticket: FrameTicket) {
        if self.tx.send(PendingFrame { delay, ticket }).is_err() {
            warn!("Frame driver is gone, dropping frame request");
        }
    }
}

/// Fires the callbacks a [`TokioScheduler`] queues into a [`SessionSlot`].
///
/// Each delay is slept from the moment the callback is picked up, so the
/// cadence follows the runtime's timer rather than a fixed origin.
pub struct FrameDriver {
    rx: mpsc::UnboundedReceiver<PendingFrame>,
    slot: SessionSlot,
}

impl FrameDriver {
    pub fn new(rx: mpsc::UnboundedReceiver<PendingFrame>, slot: SessionSlot) -> Self {
        Self { rx, slot }
    }

    /// Run until `shutdown` is cancelled or every scheduler handle is dropped
    pub async fn run(mut self, shutdown: CancellationToken) {
        debug!("Frame driver started for slot '{}'", self.slot.label());
        loop {
            let pending = tokio::select! {
                _ = shutdown.cancelled() => break,
                pending = self.rx.recv() => match pending {
                    Some(pending) => pending,
                    None => break,
                },
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = pending.ticket.token.cancelled() => continue,
                _ = tokio::time::sleep(pending.delay) => {}
            }

            if let Err(e) = self.slot.on_frame(&pending.ticket) {
                warn!("Session {} stopped: {}", pending.ticket.session, e);
            }
        }
        debug!("Frame driver for slot '{}' finished", self.slot.label());
    }
}
