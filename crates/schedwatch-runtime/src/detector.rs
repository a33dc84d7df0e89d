//! Scheduling-latency detection cycle.
//!
//! Each cycle:
//! 1. Takes a start sample (steal time first, then the clock)
//! 2. Emits a statistics report if one was requested
//! 3. Blocks in a bounded interruptible wait of `timeout / 3`
//! 4. Takes an end sample (clock first, then steal time)
//! 5. Classifies the wall delta against the timeout
//!
//! The end sample of one cycle is the start sample of the next, so deltas
//! are chained and no time between cycles goes unobserved.
//!
//! A steal fetch may block on file I/O or a call into the hypervisor service.
//! The clock reading must stay adjacent to the wait on both sides, so it is
//! taken last at the start of a cycle and first at the end.

use crate::control::ControlSignals;
use crate::steal::StealTimeSource;
use crate::suspend::{PollSuspender, Suspender, WaitOutcome};
use schedwatch_common::config::DetectionConfig;
use schedwatch_common::error::WatchError;
use schedwatch_common::sample::{CycleResult, Sample};
use schedwatch_common::state::{DetectionState, DetectionStateMachine};
use schedwatch_common::stats::{RunStatistics, StatisticsReport};
use schedwatch_common::time::{ns_to_secs, MonotonicClock, SystemClock, MSEC_PER_SEC};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

/// Errors that end the detection loop.
#[derive(Debug, Error)]
pub enum DetectorError {
    /// The bounded wait failed for a reason other than interruption.
    #[error("poll error: {0}")]
    Suspend(#[source] std::io::Error),

    /// Internal state machine violation.
    #[error(transparent)]
    State(#[from] WatchError),
}

/// Classification of one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Scheduled within the timeout.
    OnTime,
    /// Not scheduled within the timeout.
    NotScheduled,
    /// Not scheduled within the timeout and steal exceeded its threshold.
    NotScheduledStealOverload,
}

impl Verdict {
    /// Whether the cycle counts as a breach.
    #[must_use]
    pub fn is_breach(self) -> bool {
        !matches!(self, Self::OnTime)
    }
}

/// Result of a single detection cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleOutcome {
    /// Deltas and breach flag.
    pub result: CycleResult,
    /// Classification after applying the steal threshold.
    pub verdict: Verdict,
    /// How the bounded wait ended.
    pub wait: WaitOutcome,
}

/// Detection loop context.
///
/// Owns the run statistics and the chained sample; the control signals are
/// the only state shared with other actors.
pub struct Detector<C: MonotonicClock = SystemClock, W: Suspender = PollSuspender> {
    clock: C,
    suspender: W,
    steal: Box<dyn StealTimeSource>,
    config: DetectionConfig,
    signals: Arc<ControlSignals>,
    state: DetectionStateMachine,
    stats: RunStatistics,
    /// End sample of the previous cycle.
    carried: Option<Sample>,
}

impl<C: MonotonicClock, W: Suspender> Detector<C, W> {
    /// Create a detector.
    ///
    /// Until [`Detector::run`] starts, run statistics count from the clock
    /// origin; `run` restarts them at its first clock reading.
    pub fn new(
        clock: C,
        suspender: W,
        steal: Box<dyn StealTimeSource>,
        config: DetectionConfig,
        signals: Arc<ControlSignals>,
    ) -> Self {
        Self {
            clock,
            suspender,
            steal,
            config,
            signals,
            state: DetectionStateMachine::new(),
            stats: RunStatistics::new(0),
            carried: None,
        }
    }

    /// Get the current detection state.
    pub fn state(&self) -> DetectionState {
        self.state.state()
    }

    /// Get the run statistics.
    pub fn stats(&self) -> &RunStatistics {
        &self.stats
    }

    /// Get the detection parameters.
    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    /// Number of completed cycles.
    pub fn cycle_count(&self) -> u64 {
        self.state.cycles_completed()
    }

    /// Run cycles until a stop is requested, then emit the final report.
    ///
    /// The stop request is checked only at the start of a cycle, so it is
    /// observed within one wait interval plus one steal fetch.
    ///
    /// # Errors
    ///
    /// Returns [`DetectorError::Suspend`] if the bounded wait fails for a
    /// reason other than interruption.
    pub fn run(&mut self) -> Result<StatisticsReport, DetectorError> {
        info!(
            "Running main loop with maximum timeout {}ms and steal threshold {:.0}%",
            self.config.timeout_ms(),
            self.config.steal_threshold_percent()
        );
        self.stats = RunStatistics::new(self.clock.now_ns());

        while !self.signals.take_stop_request() {
            self.run_cycle()?;
        }

        self.state.transition(DetectionState::Stopped)?;
        info!(cycles = self.cycle_count(), "Main loop stopped");

        Ok(self.report())
    }

    /// Execute one detection cycle.
    ///
    /// # Errors
    ///
    /// Returns [`DetectorError::Suspend`] if the bounded wait fails for a
    /// reason other than interruption.
    pub fn run_cycle(&mut self) -> Result<CycleOutcome, DetectorError> {
        // SAMPLING
        let start = match self.carried.take() {
            Some(sample) => sample,
            None => self.sample_start(),
        };

        if self.signals.take_dump_request() {
            self.report();
        }

        let poll_interval_ms = self.config.poll_interval_ms();
        debug!(
            "now = {:.4}s, max_diff = {:.4}s, poll_timeout = {:.4}s, steal_time = {:.4}s",
            ns_to_secs(start.wall_ns),
            ns_to_secs(self.config.max_allowed_diff_ns()),
            poll_interval_ms as f64 / MSEC_PER_SEC as f64,
            ns_to_secs(start.steal_ns)
        );

        // SUSPENDED
        self.state.transition(DetectionState::Suspended)?;
        let wait = self
            .suspender
            .suspend(poll_interval_ms)
            .map_err(DetectorError::Suspend)?;
        if wait == WaitOutcome::Interrupted {
            trace!("Wait interrupted");
        }

        // RESAMPLING
        self.state.transition(DetectionState::Resampling)?;
        let end = self.sample_end();

        // EVALUATING
        self.state.transition(DetectionState::Evaluating)?;
        let result = CycleResult::evaluate(start, end, self.config.max_allowed_diff_ns());
        let verdict = self.classify(&result);
        if verdict.is_breach() {
            self.stats.increment();
        }

        self.carried = Some(end);
        self.state.transition(DetectionState::Sampling)?;

        Ok(CycleOutcome {
            result,
            verdict,
            wait,
        })
    }

    /// Log and return the current statistics.
    pub fn report(&self) -> StatisticsReport {
        let report = self.stats.report(self.clock.now_ns());
        info!("{report}");
        report
    }

    /// Start-of-cycle sample: steal time first, then the clock.
    fn sample_start(&mut self) -> Sample {
        let steal_ns = self.steal.sample();
        let wall_ns = self.clock.now_ns();
        Sample::new(wall_ns, steal_ns)
    }

    /// End-of-cycle sample: the clock first, then steal time.
    fn sample_end(&mut self) -> Sample {
        let wall_ns = self.clock.now_ns();
        let steal_ns = self.steal.sample();
        Sample::new(wall_ns, steal_ns)
    }

    /// Classify a cycle and emit the matching log lines.
    fn classify(&self, result: &CycleResult) -> Verdict {
        if !result.breached {
            trace!(
                wall_delta_ns = result.wall_delta_ns,
                steal_delta_ns = result.steal_delta_ns,
                "Scheduled on time"
            );
            return Verdict::OnTime;
        }

        error!(
            "Not scheduled for {:.4}s (threshold is {:.4}s), steal time is {:.4}s ({:.2}%)",
            ns_to_secs(result.wall_delta_ns),
            ns_to_secs(self.config.max_allowed_diff_ns()),
            ns_to_secs(result.steal_delta_ns),
            result.steal_percent
        );

        let threshold = self.config.steal_threshold_percent();
        if result.steal_exceeds(threshold) {
            warn!(
                "Steal time is > {threshold:.1}%, this is usually because of overloaded host machine"
            );
            return Verdict::NotScheduledStealOverload;
        }

        Verdict::NotScheduled
    }
}

/// Builder for configuring the detector.
pub struct DetectorBuilder<C: MonotonicClock = SystemClock, W: Suspender = PollSuspender> {
    clock: C,
    suspender: W,
    steal: Box<dyn StealTimeSource>,
    config: DetectionConfig,
    signals: Arc<ControlSignals>,
}

impl DetectorBuilder {
    /// Create a builder using the system clock and `poll(2)` waits.
    pub fn new(steal: Box<dyn StealTimeSource>, config: DetectionConfig) -> Self {
        Self {
            clock: SystemClock::new(),
            suspender: PollSuspender::new(),
            steal,
            config,
            signals: Arc::new(ControlSignals::new()),
        }
    }
}

impl<C: MonotonicClock, W: Suspender> DetectorBuilder<C, W> {
    /// Share control signals with an external notifier.
    #[must_use]
    pub fn signals(mut self, signals: Arc<ControlSignals>) -> Self {
        self.signals = signals;
        self
    }

    /// Use a different clock.
    pub fn clock<C2: MonotonicClock>(self, clock: C2) -> DetectorBuilder<C2, W> {
        DetectorBuilder {
            clock,
            suspender: self.suspender,
            steal: self.steal,
            config: self.config,
            signals: self.signals,
        }
    }

    /// Use a different wait primitive.
    pub fn suspender<W2: Suspender>(self, suspender: W2) -> DetectorBuilder<C, W2> {
        DetectorBuilder {
            clock: self.clock,
            suspender,
            steal: self.steal,
            config: self.config,
            signals: self.signals,
        }
    }

    /// Build the detector.
    pub fn build(self) -> Detector<C, W> {
        Detector::new(
            self.clock,
            self.suspender,
            self.steal,
            self.config,
            self.signals,
        )
    }
}
