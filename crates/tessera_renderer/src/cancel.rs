//! Cooperative cancellation for long renders.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A shared cancellation flag.
///
/// Owned by the caller and cloned into whatever raises it. The renderer only
/// ever reads it.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    flag: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of any render observing this flag.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Lower the flag so it can be reused for the next render.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Per-worker view of a [`CancelFlag`].
///
/// The flag is only read once more than `poll_interval` has passed since the
/// worker started, so short renders never touch it.
pub struct CancelMonitor<'a> {
    flag: &'a CancelFlag,
    started: Instant,
    poll_interval: Duration,
}

impl<'a> CancelMonitor<'a> {
    pub fn start(flag: &'a CancelFlag, poll_interval: Duration) -> Self {
        Self {
            flag,
            started: Instant::now(),
            poll_interval,
        }
    }

    /// True if the poll interval has been exceeded and the flag is raised.
    pub fn should_stop(&self) -> bool {
        interval_exceeded(self.started.elapsed(), self.poll_interval) && self.flag.is_cancelled()
    }
}

#[inline]
fn interval_exceeded(elapsed: Duration, poll_interval: Duration) -> bool {
    elapsed > poll_interval
}
