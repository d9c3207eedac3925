//! Time sources for the tick loop.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Supplies the current time to the scheduler.
pub trait Clock {
    /// Returns the current instant.
    fn now(&self) -> Instant;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
///
/// Optionally advances by a fixed step every time it is read, which lets
/// tests give each task a known cost against the run budget.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
    step: Duration,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    /// Creates a clock frozen at the current instant.
    #[must_use]
    pub fn new() -> Self {
        Self::with_step(Duration::ZERO)
    }

    /// Creates a clock that advances by `step` on every read.
    #[must_use]
    pub fn with_step(step: Duration) -> Self {
        Self {
            now: Mutex::new(Instant::now()),
            step,
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let mut now = self.now.lock();
        let current = *now;
        *now += self.step;
        current
    }
}
