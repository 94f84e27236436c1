//! Wall-clock source for retention windows and timestamp defaults.

use parking_lot::Mutex;
use std::fmt::Debug;

pub trait Clock: Send + Sync + Debug {
    /// Current time in epoch milliseconds
    fn now_ms(&self) -> f64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> f64 {
        chrono::Utc::now().timestamp_millis() as f64
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<f64>,
}

impl ManualClock {
    pub fn new(now_ms: f64) -> Self {
        Self {
            now: Mutex::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: f64) {
        *self.now.lock() = now_ms;
    }

    pub fn advance(&self, delta_ms: f64) {
        *self.now.lock() += delta_ms;
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> f64 {
        *self.now.lock()
    }
}
