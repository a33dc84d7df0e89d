//! Configuration structures for the watchdog.
//!
//! Supports TOML deserialization with defaults matching the classic command
//! line behaviour. [`DetectionConfig`] is the validated, immutable subset the
//! detection loop consumes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::time::NS_PER_MSEC;

/// Default timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 200;

/// Maximum allowed timeout (one hour) in milliseconds.
pub const MAX_TIMEOUT_MS: u64 = 1000 * 60 * 60;

/// Default steal threshold when steal comes from kernel accounting.
pub const DEFAULT_STEAL_THRESHOLD: f64 = 10.0;

/// Default steal threshold when steal comes from the hypervisor guest library.
///
/// Guests routinely see more steal than bare metal hosts, so the bar is higher.
pub const DEFAULT_STEAL_THRESHOLD_GUEST: f64 = 100.0;

/// Top-level watchdog configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Maximum time the process may go unscheduled before a cycle counts as a breach.
    /// Must be a whole number of milliseconds.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Steal percent above which a breach is attributed to host overload.
    /// `None` selects the default of the active steal backend.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steal_threshold: Option<f64>,

    /// Debug verbosity: 0 = info, 1 = debug, 2 = trace.
    pub debug: u8,

    /// Stay attached to the terminal and log to stderr.
    pub foreground: bool,

    /// One-shot process setup.
    pub process: ProcessConfig,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            steal_threshold: None,
            debug: 0,
            foreground: true,
            process: ProcessConfig::default(),
        }
    }
}

/// Process-level setup applied once before the loop starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    /// Elevate to the maximum SCHED_RR priority.
    pub set_priority: bool,

    /// When to move the process into the root cpu cgroup.
    pub cgroup: CgroupMode,

    /// Lock all current and future pages (mlockall).
    pub lock_memory: bool,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            set_priority: true,
            cgroup: CgroupMode::Auto,
            lock_memory: true,
        }
    }
}

/// Root cgroup migration policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CgroupMode {
    /// Never move.
    Off,
    /// Always move before setting the scheduler.
    On,
    /// Move only if setting the RR scheduler fails.
    #[default]
    Auto,
}

impl fmt::Display for CgroupMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Off => write!(f, "off"),
            Self::On => write!(f, "on"),
            Self::Auto => write!(f, "auto"),
        }
    }
}

impl FromStr for CgroupMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(Self::Off),
            "on" => Ok(Self::On),
            "auto" => Ok(Self::Auto),
            _ => Err(ConfigError::Invalid(format!(
                "Move to root cgroup mode {s} is invalid"
            ))),
        }
    }
}

impl WatchdogConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }

    /// Serialize configuration to TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Timeout in whole milliseconds, truncating any sub-millisecond part.
    ///
    /// [`WatchdogConfig::validate`] rejects timeouts that would truncate.
    #[must_use]
    pub fn timeout_ms(&self) -> u64 {
        u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX)
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a timeout that is not a whole
    /// number of milliseconds or lies outside `1..=MAX_TIMEOUT_MS`, or for a
    /// non-positive steal threshold.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_timeout_ms(whole_millis(self.timeout)?)?;
        if let Some(threshold) = self.steal_threshold {
            validate_steal_threshold(threshold)?;
        }
        Ok(())
    }

    /// Build the detection parameters, falling back to `default_threshold`
    /// when no steal threshold was configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is out of range.
    pub fn detection_config(&self, default_threshold: f64) -> Result<DetectionConfig, ConfigError> {
        DetectionConfig::new(
            whole_millis(self.timeout)?,
            self.steal_threshold.unwrap_or(default_threshold),
        )
    }
}

/// Validated parameters of the detection loop, immutable once it starts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionConfig {
    timeout_ms: u64,
    steal_threshold_percent: f64,
}

impl DetectionConfig {
    /// Create a detection configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `timeout_ms` is outside
    /// `1..=MAX_TIMEOUT_MS` or the threshold is not a positive number.
    pub fn new(timeout_ms: u64, steal_threshold_percent: f64) -> Result<Self, ConfigError> {
        validate_timeout_ms(timeout_ms)?;
        validate_steal_threshold(steal_threshold_percent)?;
        Ok(Self {
            timeout_ms,
            steal_threshold_percent,
        })
    }

    /// Configured timeout in milliseconds.
    #[must_use]
    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    /// Steal percent above which breaches are attributed to host overload.
    #[must_use]
    pub fn steal_threshold_percent(&self) -> f64 {
        self.steal_threshold_percent
    }

    /// Wall delta above which a cycle is a breach.
    #[must_use]
    pub fn max_allowed_diff_ns(&self) -> u64 {
        self.timeout_ms * NS_PER_MSEC
    }

    /// Length of the bounded wait; at least two samples fit in one timeout.
    #[must_use]
    pub fn poll_interval_ms(&self) -> u64 {
        self.timeout_ms / 3
    }
}

fn whole_millis(timeout: Duration) -> Result<u64, ConfigError> {
    if u64::from(timeout.subsec_nanos()) % NS_PER_MSEC != 0 {
        return Err(ConfigError::Invalid(format!(
            "Timeout {} is not a whole number of milliseconds",
            humantime::format_duration(timeout)
        )));
    }
    u64::try_from(timeout.as_millis())
        .map_err(|_| ConfigError::Invalid(format!("Timeout {timeout:?} is invalid")))
}

fn validate_timeout_ms(timeout_ms: u64) -> Result<(), ConfigError> {
    if (1..=MAX_TIMEOUT_MS).contains(&timeout_ms) {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!("Timeout {timeout_ms} is invalid")))
    }
}

fn validate_steal_threshold(threshold: f64) -> Result<(), ConfigError> {
    if threshold.is_finite() && threshold > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "Steal percent threshold {threshold} is invalid"
        )))
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Value out of range.
    #[error("{0}")]
    Invalid(String),
}

/// Serde helper module for `Duration` using humantime format.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
