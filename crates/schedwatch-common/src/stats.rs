//! Run statistics for the detection loop.
//!
//! The counter only ever grows; reports read it without resetting.

use crate::time::ns_to_secs;
use crate::PROGRAM_NAME;
use std::fmt;

/// Cumulative statistics for one watchdog run.
#[derive(Debug, Clone)]
pub struct RunStatistics {
    /// Monotonic timestamp at which the run started.
    start_wall_ns: u64,
    /// Number of cycles classified as not scheduled on time.
    not_scheduled_count: u64,
}

impl RunStatistics {
    /// Start collecting statistics at `start_wall_ns`.
    #[must_use]
    pub fn new(start_wall_ns: u64) -> Self {
        Self {
            start_wall_ns,
            not_scheduled_count: 0,
        }
    }

    /// Record one breached cycle.
    pub fn increment(&mut self) {
        self.not_scheduled_count += 1;
    }

    /// Number of breached cycles so far.
    #[must_use]
    pub fn not_scheduled_count(&self) -> u64 {
        self.not_scheduled_count
    }

    /// Monotonic start timestamp of the run.
    #[must_use]
    pub fn start_wall_ns(&self) -> u64 {
        self.start_wall_ns
    }

    /// Produce a report as of `now_ns`.
    #[must_use]
    pub fn report(&self, now_ns: u64) -> StatisticsReport {
        StatisticsReport {
            elapsed_ns: now_ns.saturating_sub(self.start_wall_ns),
            not_scheduled_count: self.not_scheduled_count,
        }
    }
}

/// Point-in-time view of [`RunStatistics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatisticsReport {
    /// Runtime since the start of the run.
    pub elapsed_ns: u64,
    /// Breached cycles so far.
    pub not_scheduled_count: u64,
}

impl fmt::Display for StatisticsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "During {:.4}s runtime {} was {}x not scheduled on time",
            ns_to_secs(self.elapsed_ns),
            PROGRAM_NAME,
            self.not_scheduled_count
        )
    }
}
