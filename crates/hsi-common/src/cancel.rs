//! Cooperative cancellation shared by every blocking point of a run.
//!
//! A single boolean flag is checked before each sleep slice, between send
//! attempts, and while waiting for a valid timestamp. Setting it never
//! interrupts a call in progress; the owner observes it at the next check.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cloneable handle to a shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a token in the not-cancelled state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Visible to every clone of this token.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Check whether cancellation has been requested.
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Sleep until `deadline` in bounded slices, re-checking the flag before each one.
    ///
    /// Returns `false` if cancellation was observed before the deadline was reached.
    pub fn sleep_until(&self, deadline: Instant, slice: Duration) -> bool {
        let slice = slice.max(Duration::from_micros(1));
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(slice));
        }
    }

    /// Sleep for `duration` in bounded slices. See [`CancelToken::sleep_until`].
    pub fn sleep_for(&self, duration: Duration, slice: Duration) -> bool {
        self.sleep_until(Instant::now() + duration, slice)
    }
}
