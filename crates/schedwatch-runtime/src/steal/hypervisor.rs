//! Steal time from a hypervisor guest introspection channel.
//!
//! The channel reports cumulative milliseconds during which the virtual
//! machine was ready to run but not scheduled by the host. Statistics must be
//! refreshed with [`GuestIntrospection::update_info`] before every read.

use super::{StealBackend, StealTimeError, StealTimeSource};
use schedwatch_common::time::NS_PER_MSEC;
use thiserror::Error;
use tracing::trace;

/// Error reported by the guest introspection channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{text} (code {code})")]
pub struct GuestLibError {
    /// Library specific error code.
    pub code: i32,
    /// Human readable description.
    pub text: String,
}

impl GuestLibError {
    /// Create an error from a code and its description.
    pub fn new(code: i32, text: impl Into<String>) -> Self {
        Self {
            code,
            text: text.into(),
        }
    }
}

/// Guest introspection channel of a hypervisor.
///
/// Implementations hold their own handle; one handle must not be shared
/// between threads without external locking.
pub trait GuestIntrospection {
    /// Refresh the cached guest statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the host could not be queried.
    fn update_info(&mut self) -> Result<(), GuestLibError>;

    /// Milliseconds the guest was runnable but not scheduled.
    ///
    /// # Errors
    ///
    /// Returns an error if the statistic is unavailable.
    fn cpu_stolen_ms(&self) -> Result<u64, GuestLibError>;

    /// Milliseconds the guest used the CPU.
    ///
    /// # Errors
    ///
    /// Returns an error if the statistic is unavailable.
    fn cpu_used_ms(&self) -> Result<u64, GuestLibError>;

    /// Milliseconds elapsed since the guest last started running on its host.
    ///
    /// # Errors
    ///
    /// Returns an error if the statistic is unavailable.
    fn elapsed_ms(&self) -> Result<u64, GuestLibError>;
}

/// Previous raw readings, kept for per-call trace deltas.
#[derive(Debug, Clone, Copy, Default)]
struct GuestReadings {
    stolen_ms: u64,
    used_ms: u64,
    elapsed_ms: u64,
}

/// Steal-time source backed by a [`GuestIntrospection`] channel.
#[derive(Debug)]
pub struct HypervisorStealSource<G: GuestIntrospection> {
    guest: G,
    previous: GuestReadings,
}

impl<G: GuestIntrospection> HypervisorStealSource<G> {
    /// Wrap an opened guest channel.
    pub fn new(guest: G) -> Self {
        Self {
            guest,
            previous: GuestReadings::default(),
        }
    }

    /// Access the underlying channel.
    pub fn guest(&self) -> &G {
        &self.guest
    }
}

impl<G: GuestIntrospection> StealTimeSource for HypervisorStealSource<G> {
    fn backend(&self) -> StealBackend {
        StealBackend::HypervisorGuest
    }

    fn read_steal_ns(&mut self) -> Result<u64, StealTimeError> {
        self.guest.update_info()?;
        let stolen_ms = self.guest.cpu_stolen_ms()?;

        // Diagnostics only; failures read as zero
        let used_ms = self.guest.cpu_used_ms().unwrap_or(0);
        let elapsed_ms = self.guest.elapsed_ms().unwrap_or(0);

        trace!(
            stolen_ms,
            stolen_delta_ms = stolen_ms.wrapping_sub(self.previous.stolen_ms),
            used_ms,
            used_delta_ms = used_ms.wrapping_sub(self.previous.used_ms),
            elapsed_ms,
            elapsed_delta_ms = elapsed_ms.wrapping_sub(self.previous.elapsed_ms),
            "Guest library steal time"
        );

        self.previous = GuestReadings {
            stolen_ms,
            used_ms,
            elapsed_ms,
        };

        Ok(stolen_ms.saturating_mul(NS_PER_MSEC))
    }
}
