//! Samples and per-cycle classification.
//!
//! A [`Sample`] pairs a monotonic wall timestamp with the cumulative steal
//! time observed at (nearly) the same moment. Two consecutive samples yield a
//! [`CycleResult`] that classifies the cycle against the configured timeout.

/// Wall time and cumulative steal time captured together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Sample {
    /// Monotonic clock reading in nanoseconds.
    pub wall_ns: u64,
    /// Cumulative steal time in nanoseconds since an unspecified epoch.
    pub steal_ns: u64,
}

impl Sample {
    /// Create a sample from its two readings.
    #[must_use]
    pub const fn new(wall_ns: u64, steal_ns: u64) -> Self {
        Self { wall_ns, steal_ns }
    }
}

/// Outcome of one detection cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleResult {
    /// Elapsed wall time between the two samples.
    pub wall_delta_ns: u64,
    /// Steal time accumulated between the two samples.
    pub steal_delta_ns: u64,
    /// `100 * steal_delta_ns / wall_delta_ns`.
    pub steal_percent: f64,
    /// Whether the wall delta exceeded the allowed maximum.
    pub breached: bool,
}

impl CycleResult {
    /// Classify the interval between `start` and `end`.
    ///
    /// Counters that go backwards saturate to a zero delta. A zero wall delta
    /// reports zero steal percent.
    #[must_use]
    pub fn evaluate(start: Sample, end: Sample, max_allowed_diff_ns: u64) -> Self {
        let wall_delta_ns = end.wall_ns.saturating_sub(start.wall_ns);
        let steal_delta_ns = end.steal_ns.saturating_sub(start.steal_ns);

        Self {
            wall_delta_ns,
            steal_delta_ns,
            steal_percent: steal_percent(steal_delta_ns, wall_delta_ns),
            breached: wall_delta_ns > max_allowed_diff_ns,
        }
    }

    /// Whether the steal share of this cycle is above `threshold_percent`.
    #[inline]
    #[must_use]
    pub fn steal_exceeds(&self, threshold_percent: f64) -> bool {
        self.steal_percent > threshold_percent
    }
}

/// Share of `wall_delta_ns` that was stolen, in percent.
#[must_use]
pub fn steal_percent(steal_delta_ns: u64, wall_delta_ns: u64) -> f64 {
    if wall_delta_ns == 0 {
        return 0.0;
    }
    100.0 * steal_delta_ns as f64 / wall_delta_ns as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX_200MS: u64 = 200_000_000;

    #[test]
    fn test_breach_with_steal() {
        let start = Sample::new(1_000_000_000, 5_000_000_000);
        let end = Sample::new(1_300_000_000, 5_060_000_000);

        let result = CycleResult::evaluate(start, end, MAX_200MS);
        assert_eq!(result.wall_delta_ns, 300_000_000);
        assert_eq!(result.steal_delta_ns, 60_000_000);
        assert_eq!(result.steal_percent, 20.0);
        assert!(result.breached);
        assert!(result.steal_exceeds(10.0));
    }

    #[test]
    fn test_exactly_at_threshold_is_not_breach() {
        let start = Sample::new(0, 0);
        let end = Sample::new(MAX_200MS, 0);

        let result = CycleResult::evaluate(start, end, MAX_200MS);
        assert!(!result.breached);

        let end = Sample::new(MAX_200MS + 1, 0);
        assert!(CycleResult::evaluate(start, end, MAX_200MS).breached);
    }

    #[test]
    fn test_steal_percent_formula() {
        for (steal, wall) in [(1u64, 3u64), (45_000_000, 312_000_000), (7, 7)] {
            let expected = 100.0 * steal as f64 / wall as f64;
            assert_eq!(steal_percent(steal, wall), expected);
        }
    }

    #[test]
    fn test_zero_wall_delta() {
        let sample = Sample::new(42, 42);
        let result = CycleResult::evaluate(sample, sample, MAX_200MS);
        assert_eq!(result.steal_percent, 0.0);
        assert!(!result.breached);
    }

    #[test]
    fn test_steal_counter_regression_saturates() {
        let start = Sample::new(0, 1_000);
        let end = Sample::new(66_000_000, 0);

        let result = CycleResult::evaluate(start, end, MAX_200MS);
        assert_eq!(result.steal_delta_ns, 0);
        assert_eq!(result.steal_percent, 0.0);
    }
}
