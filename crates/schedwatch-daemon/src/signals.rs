//! Signal handling for the detection loop.
//!
//! SIGINT and SIGTERM request a stop, SIGUSR1 requests a statistics report.
//! Handlers are installed without `SA_RESTART` so a pending signal cuts the
//! bounded wait short. The handlers only store into the atomics of
//! [`ControlSignals`].

use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use schedwatch_runtime::control::ControlSignals;
use std::os::raw::c_int;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Control flags reachable from the signal handler.
///
/// Set once from `Arc::into_raw` and never released.
static CONTROL: AtomicPtr<ControlSignals> = AtomicPtr::new(ptr::null_mut());

/// What a delivered signal asks the detection loop to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// Finish the loop and emit the final report.
    Stop,
    /// Emit a statistics report at the next cycle.
    Dump,
}

impl SignalAction {
    /// Map a signal number to its action.
    pub fn from_signal(sig: c_int) -> Option<Self> {
        match sig {
            libc::SIGINT | libc::SIGTERM => Some(Self::Stop),
            libc::SIGUSR1 => Some(Self::Dump),
            _ => None,
        }
    }

    /// Record this action in `control`.
    pub fn apply(self, control: &ControlSignals) {
        match self {
            Self::Stop => control.request_stop(),
            Self::Dump => control.request_dump(),
        }
    }
}

extern "C" fn handle_signal(sig: c_int) {
    let control = CONTROL.load(Ordering::Acquire);
    if control.is_null() {
        return;
    }

    if let Some(action) = SignalAction::from_signal(sig) {
        // SAFETY: the pointer comes from Arc::into_raw and is never released
        action.apply(unsafe { &*control });
    }
}

/// Route SIGINT, SIGTERM and SIGUSR1 to `control`.
///
/// May be called once per process; later calls keep the first target.
///
/// # Errors
///
/// Returns the OS error if a handler can't be installed.
pub fn install(control: Arc<ControlSignals>) -> std::io::Result<()> {
    let raw = Arc::into_raw(control).cast_mut();
    if CONTROL
        .compare_exchange(ptr::null_mut(), raw, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        // SAFETY: `raw` was produced by Arc::into_raw above and not published
        drop(unsafe { Arc::from_raw(raw) });
        debug!("Signal handlers already installed");
        return Ok(());
    }

    let action = SigAction::new(
        SigHandler::Handler(handle_signal),
        SaFlags::empty(),
        SigSet::empty(),
    );

    for signal in [Signal::SIGINT, Signal::SIGTERM, Signal::SIGUSR1] {
        // SAFETY: the handler only performs atomic loads and stores
        unsafe { sigaction(signal, &action) }.map_err(std::io::Error::from)?;
    }

    debug!("Signal handlers registered");
    Ok(())
}
