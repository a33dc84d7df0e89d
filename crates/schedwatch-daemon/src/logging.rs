//! Log output for the foreground and daemon modes.
//!
//! In the foreground events go to stderr. Once detached they go to syslog
//! with the `LOG_DAEMON` facility; each event becomes one syslog record.

use std::ffi::{CStr, CString};
use std::io;
use std::os::raw::c_int;
use tracing::{Level, Metadata};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

const SYSLOG_IDENT: &CStr = c"schedwatch";

/// Where log output goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    /// Standard error, for foreground runs.
    Stderr,
    /// The system logger, for detached runs.
    Syslog,
}

/// Map the `-d` count to a level filter directive.
pub fn level_for_debug(debug: u8) -> &'static str {
    match debug {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// Initialize logging.
///
/// `RUST_LOG` overrides the level derived from `debug`. The returned guard
/// closes the syslog connection when dropped.
pub fn init_logging(debug: u8, target: LogTarget) -> Option<SyslogGuard> {
    let level = level_for_debug(debug);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "schedwatch={level},schedwatch_runtime={level},schedwatch_common={level}"
        ))
    });

    match target {
        LogTarget::Stderr => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(io::stderr)
                .with_target(false)
                .init();
            None
        }
        LogTarget::Syslog => {
            let guard = SyslogGuard::open();
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(SyslogMakeWriter)
                .with_ansi(false)
                .without_time()
                .with_level(false)
                .with_target(false)
                .init();
            Some(guard)
        }
    }
}

/// Open syslog connection, closed on drop.
#[derive(Debug)]
pub struct SyslogGuard(());

impl SyslogGuard {
    fn open() -> Self {
        // SAFETY: the identity is a static NUL-terminated string
        unsafe { libc::openlog(SYSLOG_IDENT.as_ptr(), libc::LOG_PID, libc::LOG_DAEMON) };
        Self(())
    }
}

impl Drop for SyslogGuard {
    fn drop(&mut self) {
        // SAFETY: closelog has no preconditions
        unsafe { libc::closelog() };
    }
}

/// Syslog priority for a tracing level. Anything above info is logged as info.
pub fn syslog_priority(level: Level) -> c_int {
    match level {
        Level::ERROR => libc::LOG_ERR,
        Level::WARN => libc::LOG_WARNING,
        _ => libc::LOG_INFO,
    }
}

/// Creates one [`SyslogWriter`] per event.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyslogMakeWriter;

impl<'a> MakeWriter<'a> for SyslogMakeWriter {
    type Writer = SyslogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        SyslogWriter::new(libc::LOG_INFO)
    }

    fn make_writer_for(&'a self, meta: &Metadata<'_>) -> Self::Writer {
        SyslogWriter::new(syslog_priority(*meta.level()))
    }
}

/// Buffers one formatted event and submits it to syslog when dropped.
#[derive(Debug)]
pub struct SyslogWriter {
    priority: c_int,
    buf: Vec<u8>,
}

impl SyslogWriter {
    fn new(priority: c_int) -> Self {
        Self {
            priority,
            buf: Vec::with_capacity(128),
        }
    }

    /// Buffered record without the trailing newline and interior NULs.
    fn record(&self) -> CString {
        let line: Vec<u8> = self
            .buf
            .strip_suffix(b"\n")
            .unwrap_or(&self.buf)
            .iter()
            .copied()
            .filter(|&b| b != 0)
            .collect();
        CString::new(line).unwrap_or_default()
    }
}

impl io::Write for SyslogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for SyslogWriter {
    fn drop(&mut self) {
        if self.buf.is_empty() {
            return;
        }
        let record = self.record();
        // SAFETY: both strings are NUL-terminated and outlive the call
        unsafe { libc::syslog(self.priority, c"%s".as_ptr(), record.as_ptr()) };
    }
}
