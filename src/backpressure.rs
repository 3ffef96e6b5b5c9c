//! Pause/resume gates that couple buffer state to byte flow.
//!
//! Two gates steer a running link: the intake gate closes when the
//! reassembly ring overflows and reopens after the drain task reclaims
//! space, and the transmit gate follows the peer's XOFF/XON signals. Both
//! are the same mechanism, a latch the pausing side flips and the waiting
//! side parks on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// A pause/resume latch shared between the side that decides and the side
/// that waits.
///
/// Clones share state. `pause` and `resume` are idempotent and callable from
/// any context; only [`FlowGate::ready`] needs an async caller.
#[derive(Debug, Clone, Default)]
pub struct FlowGate {
    inner: Arc<GateInner>,
}

#[derive(Debug, Default)]
struct GateInner {
    paused: AtomicBool,
    reopened: Notify,
}

impl FlowGate {
    /// A new gate, open.
    pub fn new() -> Self {
        Self::default()
    }

    /// Close the gate. Harmless when already closed.
    pub fn pause(&self) {
        self.inner.paused.store(true, Ordering::Release);
    }

    /// Open the gate and wake everyone parked on it. Harmless when open.
    pub fn resume(&self) {
        if self.inner.paused.swap(false, Ordering::AcqRel) {
            self.inner.reopened.notify_waiters();
        }
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::Acquire)
    }

    /// Wait until the gate is open. Returns immediately when it already is.
    pub async fn ready(&self) {
        loop {
            if !self.is_paused() {
                return;
            }
            let reopened = self.inner.reopened.notified();
            tokio::pin!(reopened);
            // Register before re-checking so a resume between the check and
            // the await cannot be missed.
            reopened.as_mut().enable();
            if !self.is_paused() {
                return;
            }
            reopened.await;
        }
    }
}
