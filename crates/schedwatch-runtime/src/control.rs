//! Cooperative control flags shared with asynchronous notifiers.
//!
//! The flags are written from signal handlers (or any other thread) and
//! drained once per detection cycle. Only single-word atomics are used so the
//! writer never blocks.

use std::sync::atomic::{AtomicBool, Ordering};

/// Stop and dump-statistics requests.
#[derive(Debug, Default)]
pub struct ControlSignals {
    /// Set when the loop should terminate.
    stop_requested: AtomicBool,
    /// Set when a statistics report should be emitted.
    dump_requested: AtomicBool,
}

impl ControlSignals {
    /// Create a new set of cleared flags.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            stop_requested: AtomicBool::new(false),
            dump_requested: AtomicBool::new(false),
        }
    }

    /// Request loop termination. Async-signal-safe.
    #[inline]
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Relaxed);
    }

    /// Request a statistics report. Async-signal-safe.
    #[inline]
    pub fn request_dump(&self) {
        self.dump_requested.store(true, Ordering::Relaxed);
    }

    /// Check if stop has been requested without clearing it.
    #[inline]
    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Relaxed)
    }

    /// Check if stop has been requested (and clear the flag).
    #[inline]
    pub fn take_stop_request(&self) -> bool {
        self.stop_requested.swap(false, Ordering::Relaxed)
    }

    /// Check if a report has been requested (and clear the flag).
    #[inline]
    pub fn take_dump_request(&self) -> bool {
        self.dump_requested.swap(false, Ordering::Relaxed)
    }
}
