//! Process setup for timely wakeups.
//!
//! Applied once before the detection loop starts:
//! - Memory locking (mlockall) so the loop never waits on page-ins
//! - Maximum `SCHED_RR` priority
//! - Migration into the root cpu cgroup, where real-time runtime is not
//!   throttled by a parent group
//!
//! None of these steps is fatal. The watchdog still reports delays without
//! them, just with more noise of its own.

use schedwatch_common::config::{CgroupMode, ProcessConfig};
use schedwatch_common::error::{WatchError, WatchResult};
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Mount point of the cgroup hierarchy on systemd based distributions.
pub const CGROUP_ROOT: &str = "/sys/fs/cgroup";

/// Cgroup hierarchy layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgroupVersion {
    /// Per-controller hierarchies (`cpu/tasks`).
    V1,
    /// Unified hierarchy (`cgroup.procs`).
    V2,
}

impl fmt::Display for CgroupVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V1 => write!(f, "v1"),
            Self::V2 => write!(f, "v2"),
        }
    }
}

/// Locations of the root cgroup control files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CgroupPaths {
    root: PathBuf,
}

impl CgroupPaths {
    /// Use a hierarchy mounted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Hierarchy mount point.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn v1_rt_runtime(&self) -> PathBuf {
        self.root.join("cpu").join("cpu.rt_runtime_us")
    }

    fn v1_tasks(&self) -> PathBuf {
        self.root.join("cpu").join("tasks")
    }

    fn v2_procs(&self) -> PathBuf {
        self.root.join("cgroup.procs")
    }

    /// Detect the layout and the file the pid must be written to.
    pub fn detect(&self) -> Option<(CgroupVersion, PathBuf)> {
        if self.v1_rt_runtime().exists() {
            Some((CgroupVersion::V1, self.v1_tasks()))
        } else if self.v2_procs().exists() {
            Some((CgroupVersion::V2, self.v2_procs()))
        } else {
            None
        }
    }
}

impl Default for CgroupPaths {
    fn default() -> Self {
        Self::new(CGROUP_ROOT)
    }
}

/// Result of process setup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessSetupStatus {
    /// Whether memory was locked successfully.
    pub memory_locked: bool,
    /// Applied `SCHED_RR` priority.
    pub rr_priority: Option<i32>,
    /// Layout of the root cgroup the process was moved into.
    pub cgroup: Option<CgroupVersion>,
}

/// Apply process setup based on configuration.
///
/// Order follows the classic tool: lock memory, move to the root cgroup when
/// the mode is `on`, then raise the scheduler priority. In `auto` mode the
/// first priority attempt is silent; if it fails the process is moved to the
/// root cgroup and the attempt is repeated with warnings enabled.
pub fn apply_process_setup(config: &ProcessConfig, paths: &CgroupPaths) -> ProcessSetupStatus {
    let mut status = ProcessSetupStatus::default();

    if config.lock_memory {
        status.memory_locked = lock_memory().is_ok();
    }

    if config.cgroup == CgroupMode::On {
        status.cgroup = move_to_root_cgroup(paths).ok().flatten();
    }

    if config.set_priority {
        let silent = config.cgroup == CgroupMode::Auto;
        status.rr_priority = match set_rr_scheduler(silent) {
            Ok(prio) => Some(prio),
            Err(_) if config.cgroup == CgroupMode::Auto => {
                debug!("Can't set SCHED_RR, retrying from the root cgroup");
                status.cgroup = move_to_root_cgroup(paths).ok().flatten();
                set_rr_scheduler(false).ok()
            }
            Err(_) => None,
        };
    }

    info!(?status, "Process setup complete");
    status
}

/// Lock all current and future memory pages.
///
/// Raises `RLIMIT_MEMLOCK` first; if that fails memory is not locked.
///
/// # Errors
///
/// Returns [`WatchError::MemoryLock`] if either step fails. Failures are also
/// logged at warn level.
#[cfg(target_os = "linux")]
pub fn lock_memory() -> WatchResult<()> {
    use nix::sys::mman::{mlockall, MlockAllFlags};
    use nix::sys::resource::{setrlimit, Resource, RLIM_INFINITY};

    if let Err(e) = setrlimit(Resource::RLIMIT_MEMLOCK, RLIM_INFINITY, RLIM_INFINITY) {
        warn!(error = %e, "Could not increase RLIMIT_MEMLOCK, not locking memory");
        return Err(WatchError::MemoryLock(format!("setrlimit failed: {e}")));
    }

    debug!("Locking memory pages with mlockall");
    if let Err(e) = mlockall(MlockAllFlags::MCL_CURRENT | MlockAllFlags::MCL_FUTURE) {
        warn!(error = %e, "Could not mlockall");
        return Err(WatchError::MemoryLock(format!("mlockall failed: {e}")));
    }

    debug!("Memory locked");
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn lock_memory() -> WatchResult<()> {
    warn!("mlockall not available on this platform");
    Err(WatchError::MemoryLock("unsupported platform".into()))
}

/// Switch the process to `SCHED_RR` at the maximum priority.
///
/// Returns the applied priority. With `silent` set, failures are not logged.
///
/// # Errors
///
/// Returns [`WatchError::Scheduler`] if the priority range can't be queried
/// or the policy can't be applied (typically `EPERM` without
/// `CAP_SYS_NICE`).
#[cfg(unix)]
pub fn set_rr_scheduler(silent: bool) -> WatchResult<i32> {
    // SAFETY: sched_get_priority_max has no preconditions
    let max_prio = unsafe { libc::sched_get_priority_max(libc::SCHED_RR) };
    if max_prio == -1 {
        let err = std::io::Error::last_os_error();
        if !silent {
            warn!(error = %err, "Can't get maximum SCHED_RR priority");
        }
        return Err(WatchError::Scheduler(format!(
            "sched_get_priority_max failed: {err}"
        )));
    }

    let param = libc::sched_param {
        sched_priority: max_prio,
    };
    // SAFETY: pid 0 targets the calling process and `param` outlives the call
    let res = unsafe { libc::sched_setscheduler(0, libc::SCHED_RR, &param) };
    if res == -1 {
        let err = std::io::Error::last_os_error();
        if !silent {
            warn!(error = %err, "Can't set SCHED_RR");
        }
        return Err(WatchError::Scheduler(format!(
            "sched_setscheduler failed: {err}"
        )));
    }

    info!(priority = max_prio, "SCHED_RR scheduler configured");
    Ok(max_prio)
}

#[cfg(not(unix))]
pub fn set_rr_scheduler(_silent: bool) -> WatchResult<i32> {
    warn!("Platform without SCHED_RR");
    Err(WatchError::Scheduler("unsupported platform".into()))
}

/// Move the process into the root cgroup.
///
/// Prefers cgroup v1 when `cpu/cpu.rt_runtime_us` exists, since that file
/// only appears with real-time group scheduling enabled. Returns `Ok(None)`
/// when neither layout is present.
///
/// # Errors
///
/// Returns [`WatchError::Cgroup`] if the pid can't be written. Failures are
/// also logged at warn level.
pub fn move_to_root_cgroup(paths: &CgroupPaths) -> WatchResult<Option<CgroupVersion>> {
    let Some((version, procs)) = paths.detect() else {
        debug!(
            root = %paths.root().display(),
            "cpu.rt_runtime_us or cgroup.procs doesn't exist, \
             system without cgroup or with disabled CONFIG_RT_GROUP_SCHED"
        );
        return Ok(None);
    };

    debug!(%version, "Moving main pid to root cgroup");

    let pid = std::process::id();
    let mut file = OpenOptions::new().write(true).open(&procs).map_err(|e| {
        warn!(path = %procs.display(), error = %e, "Can't open cgroup tasks file for writing");
        WatchError::Cgroup(format!("open {}: {e}", procs.display()))
    })?;

    writeln!(file, "{pid}").map_err(|e| {
        warn!(path = %procs.display(), error = %e, "Can't write pid into cgroup tasks file");
        WatchError::Cgroup(format!("write {}: {e}", procs.display()))
    })?;

    Ok(Some(version))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn v2_tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("cgroup.procs"), "").unwrap();
        dir
    }

    fn v1_tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("cpu")).unwrap();
        fs::write(dir.path().join("cpu/cpu.rt_runtime_us"), "950000\n").unwrap();
        fs::write(dir.path().join("cpu/tasks"), "").unwrap();
        dir
    }

    fn disabled() -> ProcessConfig {
        ProcessConfig {
            set_priority: false,
            cgroup: CgroupMode::Off,
            lock_memory: false,
        }
    }

    #[test]
    fn test_default_paths() {
        assert_eq!(CgroupPaths::default().root(), Path::new("/sys/fs/cgroup"));
    }

    #[test]
    fn test_move_v2() {
        let dir = v2_tree();
        let paths = CgroupPaths::new(dir.path());

        let version = move_to_root_cgroup(&paths).unwrap();
        assert_eq!(version, Some(CgroupVersion::V2));

        let written = fs::read_to_string(dir.path().join("cgroup.procs")).unwrap();
        assert_eq!(written.trim(), std::process::id().to_string());
    }

    #[test]
    fn test_v1_preferred_over_v2() {
        let dir = v1_tree();
        fs::write(dir.path().join("cgroup.procs"), "").unwrap();
        let paths = CgroupPaths::new(dir.path());

        assert_eq!(
            move_to_root_cgroup(&paths).unwrap(),
            Some(CgroupVersion::V1)
        );
        let tasks = fs::read_to_string(dir.path().join("cpu/tasks")).unwrap();
        assert_eq!(tasks.trim(), std::process::id().to_string());
        assert!(fs::read_to_string(dir.path().join("cgroup.procs"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_no_cgroup_is_noop() {
        let dir = TempDir::new().unwrap();
        let paths = CgroupPaths::new(dir.path());
        assert_eq!(paths.detect(), None);
        assert_eq!(move_to_root_cgroup(&paths).unwrap(), None);
    }

    #[test]
    fn test_missing_tasks_file_is_error() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("cpu")).unwrap();
        fs::write(dir.path().join("cpu/cpu.rt_runtime_us"), "0\n").unwrap();

        let result = move_to_root_cgroup(&CgroupPaths::new(dir.path()));
        assert!(matches!(result, Err(WatchError::Cgroup(_))));
    }

    #[test]
    fn test_setup_disabled() {
        let dir = v2_tree();
        let status = apply_process_setup(&disabled(), &CgroupPaths::new(dir.path()));
        assert_eq!(status, ProcessSetupStatus::default());
        assert!(fs::read_to_string(dir.path().join("cgroup.procs"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_setup_cgroup_on() {
        let dir = v2_tree();
        let config = ProcessConfig {
            cgroup: CgroupMode::On,
            ..disabled()
        };
        let status = apply_process_setup(&config, &CgroupPaths::new(dir.path()));
        assert_eq!(status.cgroup, Some(CgroupVersion::V2));
        assert!(status.rr_priority.is_none());
    }

    #[test]
    fn test_setup_auto_without_priority_does_not_move() {
        let dir = v2_tree();
        let config = ProcessConfig {
            cgroup: CgroupMode::Auto,
            ..disabled()
        };
        let status = apply_process_setup(&config, &CgroupPaths::new(dir.path()));
        assert!(status.cgroup.is_none());
    }
}
