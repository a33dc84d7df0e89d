//! Steal-time acquisition.
//!
//! Provides:
//! - [`StealTimeSource`] trait for cumulative steal-time counters
//! - [`kernel`] source reading the aggregate CPU accounting of the kernel
//! - [`hypervisor`] source querying a guest introspection channel
//! - [`select_steal_source`] choosing the active source once at startup
//!
//! Failures to read steal time are never fatal: [`StealTimeSource::sample`]
//! reports them as zero steal.

pub mod hypervisor;
pub mod kernel;
#[cfg(feature = "vmguestlib")]
pub mod vmguestlib;

pub use hypervisor::*;
pub use kernel::*;

use schedwatch_common::config::{DEFAULT_STEAL_THRESHOLD, DEFAULT_STEAL_THRESHOLD_GUEST};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info};

/// Which kind of steal-time source is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StealBackend {
    /// Kernel CPU accounting (`/proc/stat`).
    Kernel,
    /// Hypervisor guest introspection library.
    HypervisorGuest,
}

impl StealBackend {
    /// Steal percent threshold used when none was configured.
    #[must_use]
    pub fn default_threshold(self) -> f64 {
        match self {
            Self::Kernel => DEFAULT_STEAL_THRESHOLD,
            Self::HypervisorGuest => DEFAULT_STEAL_THRESHOLD_GUEST,
        }
    }
}

impl fmt::Display for StealBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Kernel => write!(f, "kernel"),
            Self::HypervisorGuest => write!(f, "hypervisor-guest"),
        }
    }
}

/// Errors raised while fetching steal time.
#[derive(Debug, Error)]
pub enum StealTimeError {
    /// The accounting file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Path of the accounting file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The accounting data did not contain a usable aggregate line.
    #[error("malformed CPU accounting: {0}")]
    Malformed(String),

    /// The guest introspection channel reported an error.
    #[error("guest library error: {0}")]
    Guest(#[from] GuestLibError),
}

/// Source of cumulative steal time.
pub trait StealTimeSource {
    /// Kind of this source.
    fn backend(&self) -> StealBackend;

    /// Fetch cumulative steal time in nanoseconds.
    ///
    /// May block on file I/O or a cross-process call.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying counter cannot be read.
    fn read_steal_ns(&mut self) -> Result<u64, StealTimeError>;

    /// Fetch cumulative steal time, degrading to zero on failure.
    fn sample(&mut self) -> u64 {
        match self.read_steal_ns() {
            Ok(ns) => ns,
            Err(e) => {
                debug!(backend = %self.backend(), error = %e, "Steal time unavailable, assuming none");
                0
            }
        }
    }
}

/// Result of steal source selection.
pub struct SelectedSource {
    /// The active source for the rest of the process lifetime.
    pub source: Box<dyn StealTimeSource>,
    /// Kind of the active source.
    pub backend: StealBackend,
}

impl SelectedSource {
    /// Steal percent threshold to use when the user did not set one.
    #[must_use]
    pub fn default_threshold(&self) -> f64 {
        self.backend.default_threshold()
    }
}

impl fmt::Debug for SelectedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectedSource")
            .field("backend", &self.backend)
            .finish_non_exhaustive()
    }
}

/// Choose the steal-time source for this process.
///
/// Tries to open the guest introspection channel first. On success the
/// hypervisor source is used; otherwise `kernel` is.
pub fn select_steal_source<G, F>(open_guest: F, kernel: KernelStealSource) -> SelectedSource
where
    G: GuestIntrospection + 'static,
    F: FnOnce() -> Result<G, GuestLibError>,
{
    match open_guest() {
        Ok(guest) => {
            info!("Using guest library steal time");
            SelectedSource {
                source: Box::new(HypervisorStealSource::new(guest)),
                backend: StealBackend::HypervisorGuest,
            }
        }
        Err(e) => {
            debug!(error = %e, "Can't open guest library handle, using kernel steal time");
            SelectedSource {
                source: Box::new(kernel),
                backend: StealBackend::Kernel,
            }
        }
    }
}

/// Choose the steal-time source using the bindings compiled into this build.
#[must_use]
pub fn select_platform_source() -> SelectedSource {
    #[cfg(feature = "vmguestlib")]
    {
        select_steal_source(vmguestlib::VmGuestLib::open, KernelStealSource::new())
    }

    #[cfg(not(feature = "vmguestlib"))]
    {
        debug!("Guest library support not compiled in, using kernel steal time");
        SelectedSource {
            source: Box::new(KernelStealSource::new()),
            backend: StealBackend::Kernel,
        }
    }
}
