//! Tick (jiffy) arithmetic.
//!
//! Intervals are accepted in milliseconds and stored in scheduler ticks.
//! Conversions round up, so a non-zero millisecond value never becomes a
//! zero-tick interval.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Nanoseconds per millisecond.
pub const NSEC_PER_MSEC: i64 = 1_000_000;

/// Milliseconds per second.
pub const MSEC_PER_SEC: u64 = 1_000;

/// A duration expressed in scheduler ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ticks(pub u64);

impl Ticks {
    /// Raw tick count.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Ticks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ticks", self.0)
    }
}

/// Scheduler tick rate (ticks per second). Never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct TickRate(u32);

impl TryFrom<u32> for TickRate {
    type Error = String;

    fn try_from(hz: u32) -> Result<Self, Self::Error> {
        Self::new(hz).ok_or_else(|| "tick rate must be non-zero".to_string())
    }
}

impl From<TickRate> for u32 {
    fn from(rate: TickRate) -> Self {
        rate.0
    }
}

impl Default for TickRate {
    fn default() -> Self {
        Self(100)
    }
}

impl TickRate {
    /// Create a tick rate. Returns `None` for a zero rate.
    #[must_use]
    pub fn new(hz: u32) -> Option<Self> {
        (hz != 0).then_some(Self(hz))
    }

    /// Ticks per second.
    #[must_use]
    pub fn hz(self) -> u32 {
        self.0
    }

    /// Convert milliseconds to ticks, rounding up.
    #[must_use]
    pub fn msecs_to_ticks(self, ms: u32) -> Ticks {
        let scaled = u64::from(ms) * u64::from(self.0);
        Ticks(scaled.div_ceil(MSEC_PER_SEC))
    }

    /// Convert ticks to milliseconds, truncating.
    #[must_use]
    pub fn ticks_to_msecs(self, ticks: Ticks) -> u64 {
        ticks.0.saturating_mul(MSEC_PER_SEC) / u64::from(self.0)
    }
}
