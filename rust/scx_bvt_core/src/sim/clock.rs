use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::timer::Clock;
use crate::types::TimeNs;

/// Simulated monotonic clock. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct SimClock(Arc<AtomicU64>);

impl SimClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock to `now`. Time never goes backwards.
    pub fn set(&self, now: TimeNs) {
        self.0.fetch_max(now, Ordering::SeqCst);
    }

    pub fn advance(&self, delta: TimeNs) {
        self.0.fetch_add(delta, Ordering::SeqCst);
    }
}

impl Clock for SimClock {
    fn now(&self) -> TimeNs {
        self.0.load(Ordering::SeqCst)
    }
}
