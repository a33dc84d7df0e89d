use thiserror::Error;

/// Watchdog error types for process setup and the detection state machine.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum WatchError {
    /// Memory locking could not be applied.
    #[error("memory lock error: {0}")]
    MemoryLock(String),

    /// Real-time scheduler policy could not be applied.
    #[error("scheduler error: {0}")]
    Scheduler(String),

    /// Cgroup membership could not be changed.
    #[error("cgroup error: {0}")]
    Cgroup(String),

    /// Invalid detection state transition attempted.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Source state.
        from: String,
        /// Attempted target state.
        to: String,
    },
}

/// Convenience type alias for watchdog operations.
pub type WatchResult<T> = Result<T, WatchError>;
