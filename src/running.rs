//! Process-wide cooperative shutdown signal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Longest uninterrupted nap taken by [`RunningFlag::sleep`].
const SLEEP_SLICE: Duration = Duration::from_millis(25);

/// Shared boolean that starts set and is cleared once to request shutdown.
///
/// Workers poll it; nothing ever blocks on it.
#[derive(Debug, Clone)]
pub struct RunningFlag(Arc<AtomicBool>);

impl RunningFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Clears the flag. Idempotent.
    pub fn stop(&self) {
        self.0.store(false, Ordering::Release);
    }

    /// Sleeps for `duration`, waking early if the flag is cleared.
    ///
    /// Returns whether the flag is still set.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if !self.is_running() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
}

impl Default for RunningFlag {
    fn default() -> Self {
        Self::new()
    }
}
