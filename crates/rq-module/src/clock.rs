//! Monotonic time sources.
//!
//! - [`MonotonicClock`] reads `CLOCK_MONOTONIC`, the same base the kernel's
//!   `ktime_get()` uses.
//! - [`ManualClock`] only moves when told to; tests use it to step time
//!   deterministically.

use std::fmt::Debug;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tracing::warn;

/// Source of nanosecond timestamps.
pub trait Clock: Send + Sync + Debug {
    /// Current time in nanoseconds.
    fn now_ns(&self) -> i64;
}

/// Host monotonic clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now_ns(&self) -> i64 {
        use nix::time::{clock_gettime, ClockId};

        match clock_gettime(ClockId::CLOCK_MONOTONIC) {
            Ok(ts) => i64::from(ts.tv_sec()) * 1_000_000_000 + i64::from(ts.tv_nsec()),
            Err(e) => {
                warn!("clock_gettime(CLOCK_MONOTONIC) failed: {e}");
                0
            }
        }
    }
}

/// Manually advanced clock.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ns: AtomicI64,
}

impl ManualClock {
    /// Create a clock reading `start_ns`.
    #[must_use]
    pub fn new(start_ns: i64) -> Self {
        Self {
            now_ns: AtomicI64::new(start_ns),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let delta = i64::try_from(by.as_nanos()).unwrap_or(i64::MAX);
        self.now_ns.fetch_add(delta, Ordering::AcqRel);
    }

    /// Set an absolute reading, which may move the clock backwards.
    pub fn set_ns(&self, now_ns: i64) {
        self.now_ns.store(now_ns, Ordering::Release);
    }
}

impl Clock for ManualClock {
    fn now_ns(&self) -> i64 {
        self.now_ns.load(Ordering::Acquire)
    }
}
