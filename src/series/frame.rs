//! Redraw coalescing.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::Notify;

/// Collapses any number of redraw requests between two frames into one.
#[derive(Debug, Default)]
pub struct FrameScheduler {
    pending: AtomicBool,
    requested: AtomicU64,
    notify: Notify,
}

impl FrameScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a redraw. Returns true if this call armed the next frame.
    pub fn schedule(&self) -> bool {
        self.requested.fetch_add(1, Ordering::Relaxed);
        let armed = !self.pending.swap(true, Ordering::AcqRel);
        if armed {
            self.notify.notify_one();
        }
        armed
    }

    /// Consume the pending request, if any.
    pub fn take(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Total redraw requests seen
    pub fn requested(&self) -> u64 {
        self.requested.load(Ordering::Relaxed)
    }

    /// Wait until a redraw is pending.
    pub async fn armed(&self) {
        while !self.is_pending() {
            self.notify.notified().await;
        }
    }
}
