//! Bounded interruptible wait.
//!
//! The detection cycle blocks here between its two samples. Signal delivery
//! interrupts the wait early, which is reported as [`WaitOutcome::Interrupted`]
//! rather than an error.

use std::io;

/// How a bounded wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The full interval elapsed.
    Elapsed,
    /// A signal woke the wait before the interval elapsed.
    Interrupted,
}

/// Blocking primitive used by the detection cycle.
pub trait Suspender {
    /// Block for up to `timeout_ms` milliseconds.
    ///
    /// `timeout_ms == 0` returns immediately.
    ///
    /// # Errors
    ///
    /// Returns the OS error for any failure other than interruption.
    fn suspend(&mut self, timeout_ms: u64) -> io::Result<WaitOutcome>;
}

/// `poll(2)` with no descriptors.
#[derive(Debug, Clone, Copy, Default)]
pub struct PollSuspender;

impl PollSuspender {
    /// Create a new poll based suspender.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Suspender for PollSuspender {
    #[cfg(unix)]
    fn suspend(&mut self, timeout_ms: u64) -> io::Result<WaitOutcome> {
        let timeout = libc::c_int::try_from(timeout_ms).unwrap_or(libc::c_int::MAX);

        // SAFETY: poll with a null descriptor array and nfds == 0 only sleeps
        let res = unsafe { libc::poll(std::ptr::null_mut(), 0, timeout) };
        if res == -1 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                return Ok(WaitOutcome::Interrupted);
            }
            return Err(err);
        }

        Ok(WaitOutcome::Elapsed)
    }

    #[cfg(not(unix))]
    fn suspend(&mut self, timeout_ms: u64) -> io::Result<WaitOutcome> {
        std::thread::sleep(std::time::Duration::from_millis(timeout_ms));
        Ok(WaitOutcome::Elapsed)
    }
}
