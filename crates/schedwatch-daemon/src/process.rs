//! Detaching from the controlling terminal.

use anyhow::{Context, Result};
use nix::unistd::{dup2, fork, setsid, ForkResult};
use std::fs::OpenOptions;
use std::os::fd::AsRawFd;

/// Fork into the background and start a new session.
///
/// The parent exits with status 0. In the child, stdin, stdout and stderr
/// are mapped to `/dev/null`. Must run before any thread is spawned.
///
/// # Errors
///
/// Returns an error if the fork fails or the standard streams can't be
/// redirected.
pub fn detach_from_terminal() -> Result<()> {
    // SAFETY: called while the process is still single-threaded
    match unsafe { fork() }.context("Can't create child process")? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {}
    }

    // Already a group leader is the only failure, which is harmless
    let _ = setsid();

    let devnull = OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/null")
        .context("Can't open /dev/null")?;

    for fd in 0..=2 {
        dup2(devnull.as_raw_fd(), fd).context("Can't dup2 stdin/out/err to /dev/null")?;
    }

    Ok(())
}
