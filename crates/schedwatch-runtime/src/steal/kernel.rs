//! Steal time from kernel CPU accounting.
//!
//! Reads the aggregate `cpu` line of `/proc/stat`:
//!
//! ```text
//! cpu  user nice system idle iowait irq softirq steal guest guest_nice
//! ```
//!
//! Per-core `cpuN` lines are ignored. The steal column is expressed in clock
//! ticks and converted to nanoseconds with the platform tick rate.

use super::{StealBackend, StealTimeError, StealTimeSource};
use schedwatch_common::time::NS_PER_SEC;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::trace;

/// Default location of the kernel CPU accounting.
pub const PROC_STAT_PATH: &str = "/proc/stat";

/// Tick rate assumed when `_SC_CLK_TCK` cannot be queried.
pub const FALLBACK_CLOCK_TICKS: u64 = 100;

/// Minimum number of numeric columns for the aggregate line to be usable.
const MIN_CPU_FIELDS: usize = 5;

/// Cumulative per-category CPU ticks of the aggregate `cpu` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CpuTicks {
    /// Time in user mode.
    pub user: u64,
    /// Time in user mode with low priority.
    pub nice: u64,
    /// Time in kernel mode.
    pub system: u64,
    /// Idle time.
    pub idle: u64,
    /// Time waiting for I/O.
    pub iowait: u64,
    /// Time servicing interrupts.
    pub irq: u64,
    /// Time servicing softirqs.
    pub softirq: u64,
    /// Time stolen by the hypervisor.
    pub steal: u64,
}

impl CpuTicks {
    /// Parse a single accounting line.
    ///
    /// Returns `None` unless the first token is exactly `cpu` and at least
    /// five numeric columns follow. Missing trailing columns read as zero.
    #[must_use]
    pub fn parse_line(line: &str) -> Option<Self> {
        let mut tokens = line.split_whitespace();
        if tokens.next()? != "cpu" {
            return None;
        }

        let values: Vec<u64> = tokens.map_while(|t| t.parse().ok()).take(8).collect();
        if values.len() < MIN_CPU_FIELDS {
            return None;
        }

        let field = |i: usize| values.get(i).copied().unwrap_or(0);
        Some(Self {
            user: field(0),
            nice: field(1),
            system: field(2),
            idle: field(3),
            iowait: field(4),
            irq: field(5),
            softirq: field(6),
            steal: field(7),
        })
    }

    /// Scan `reader` for the aggregate line.
    ///
    /// # Errors
    ///
    /// Returns [`StealTimeError::Malformed`] if no valid aggregate line is
    /// found, or [`StealTimeError::Io`] (tagged with `path`) on read errors.
    pub fn from_reader<R: BufRead>(reader: R, path: &Path) -> Result<Self, StealTimeError> {
        for line in reader.lines() {
            let line = line.map_err(|e| StealTimeError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;
            if let Some(ticks) = Self::parse_line(&line) {
                return Ok(ticks);
            }
        }

        Err(StealTimeError::Malformed(format!(
            "no aggregate cpu line in {}",
            path.display()
        )))
    }
}

/// Query the platform clock tick rate (`_SC_CLK_TCK`).
#[must_use]
pub fn clock_ticks_per_sec() -> Option<u64> {
    #[cfg(unix)]
    {
        // SAFETY: sysconf has no preconditions
        let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
        u64::try_from(ticks).ok().filter(|&t| t > 0)
    }
    #[cfg(not(unix))]
    {
        None
    }
}

/// Convert clock ticks to nanoseconds.
///
/// Uses `clock_ticks` when known and [`FALLBACK_CLOCK_TICKS`] otherwise.
#[must_use]
pub fn ticks_to_ns(ticks: u64, clock_ticks: Option<u64>) -> u64 {
    let hz = clock_ticks
        .filter(|&t| t > 0)
        .unwrap_or(FALLBACK_CLOCK_TICKS);
    ticks.saturating_mul(NS_PER_SEC / hz)
}

/// Steal-time source backed by kernel CPU accounting.
#[derive(Debug, Clone)]
pub struct KernelStealSource {
    path: PathBuf,
    clock_ticks: Option<u64>,
}

impl KernelStealSource {
    /// Read `/proc/stat` using the platform tick rate.
    #[must_use]
    pub fn new() -> Self {
        let clock_ticks = clock_ticks_per_sec();
        if clock_ticks.is_none() {
            trace!(
                fallback = FALLBACK_CLOCK_TICKS,
                "Can't get _SC_CLK_TCK, using fallback"
            );
        }
        Self {
            path: PathBuf::from(PROC_STAT_PATH),
            clock_ticks,
        }
    }

    /// Read accounting from `path` instead of `/proc/stat`.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    /// Override the tick rate; `None` selects the fallback.
    #[must_use]
    pub fn with_clock_ticks(mut self, clock_ticks: Option<u64>) -> Self {
        self.clock_ticks = clock_ticks;
        self
    }

    /// Accounting file being read.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the current aggregate counters.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is unreadable or malformed.
    pub fn read_ticks(&self) -> Result<CpuTicks, StealTimeError> {
        let file = File::open(&self.path).map_err(|e| StealTimeError::Io {
            path: self.path.clone(),
            source: e,
        })?;
        CpuTicks::from_reader(BufReader::new(file), &self.path)
    }
}

impl Default for KernelStealSource {
    fn default() -> Self {
        Self::new()
    }
}

impl StealTimeSource for KernelStealSource {
    fn backend(&self) -> StealBackend {
        StealBackend::Kernel
    }

    fn read_steal_ns(&mut self) -> Result<u64, StealTimeError> {
        let ticks = self.read_ticks()?;
        let steal_ns = ticks_to_ns(ticks.steal, self.clock_ticks);

        trace!(
            user = ticks.user,
            nice = ticks.nice,
            system = ticks.system,
            idle = ticks.idle,
            iowait = ticks.iowait,
            irq = ticks.irq,
            softirq = ticks.softirq,
            steal = ticks.steal,
            steal_ns,
            "Kernel steal time"
        );

        Ok(steal_ns)
    }
}
