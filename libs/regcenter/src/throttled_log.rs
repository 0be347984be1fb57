//! Lock-free throttle for repetitive warnings.
//!
//! Heartbeat failures share one throttle per registry, so a dead backend
//! produces one warning per window instead of one per instance per tick.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;

/// Decides whether a warning may be emitted now and counts the ones that were
/// suppressed in between.
///
/// Reads the runtime clock, so a paused test clock also pauses the throttle.
pub struct ThrottledLog {
    start: Instant,
    /// Next admitted time, in milliseconds since `start`.
    next_log_ms: AtomicU64,
    throttle_ms: u64,
    suppressed: AtomicU64,
}

fn u64_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl ThrottledLog {
    #[must_use]
    pub fn new(throttle: Duration) -> Self {
        Self {
            start: Instant::now(),
            next_log_ms: AtomicU64::new(0),
            throttle_ms: u64_millis(throttle),
            suppressed: AtomicU64::new(0),
        }
    }

    /// Returns `Some(n)` when logging is allowed, where `n` is the number of
    /// events suppressed since the previous admitted one; `None` otherwise.
    ///
    /// Under concurrent calls only one caller per window is admitted.
    #[must_use]
    pub fn admit(&self) -> Option<u64> {
        let now_ms = u64_millis(self.start.elapsed());
        let next = self.next_log_ms.load(Ordering::Relaxed);

        let admitted = now_ms >= next
            && self
                .next_log_ms
                .compare_exchange(
                    next,
                    now_ms.saturating_add(self.throttle_ms),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                )
                .is_ok();

        if admitted {
            Some(self.suppressed.swap(0, Ordering::Relaxed))
        } else {
            self.suppressed.fetch_add(1, Ordering::Relaxed);
            None
        }
    }
}
