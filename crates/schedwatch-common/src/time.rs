//! Monotonic time source and unit conversions.

use std::time::Instant;

/// Nanoseconds in one second.
pub const NS_PER_SEC: u64 = 1_000_000_000;

/// Nanoseconds in one millisecond.
pub const NS_PER_MSEC: u64 = 1_000_000;

/// Milliseconds in one second.
pub const MSEC_PER_SEC: u64 = 1_000;

/// A monotonically non-decreasing nanosecond clock.
///
/// Implementations must be immune to wall-clock adjustments.
pub trait MonotonicClock {
    /// Current timestamp in nanoseconds since an arbitrary fixed origin.
    fn now_ns(&self) -> u64;
}

/// `CLOCK_MONOTONIC` backed clock.
///
/// Timestamps are relative to the moment the clock was created.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Create a clock anchored at the current instant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock for SystemClock {
    #[inline]
    fn now_ns(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }
}

/// Convert nanoseconds to fractional seconds for display.
#[inline]
#[must_use]
pub fn ns_to_secs(ns: u64) -> f64 {
    ns as f64 / NS_PER_SEC as f64
}
