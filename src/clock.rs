//! Strictly monotonic timestamp source.
//!
//! Reply and change-event timestamps must form a strictly increasing
//! sequence even when the OS clock resolution stalls between two reads,
//! so the raw elapsed time is bumped past the last issued value.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Issues u64 nanosecond timestamps that never repeat or go backwards.
///
/// Timestamps are relative to clock creation, not wall time.
pub struct MonotonicClock {
    origin: Instant,
    last: AtomicU64,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last: AtomicU64::new(0),
        }
    }

    /// Current timestamp, strictly greater than every previous one.
    pub fn now(&self) -> u64 {
        let raw = self.origin.elapsed().as_nanos() as u64;
        let prev = self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(raw.max(last + 1))
            })
            .unwrap_or(0);
        raw.max(prev + 1)
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}
