//! schedwatch entry point.
//!
//! Measures how long the process actually waits compared to how long it
//! asked to wait, and reports when it was not scheduled on time together
//! with the steal time observed over the same interval.

mod logging;
mod process;
mod signals;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use schedwatch_common::config::{CgroupMode, WatchdogConfig, MAX_TIMEOUT_MS};
use schedwatch_runtime::control::ControlSignals;
use schedwatch_runtime::detector::{DetectorBuilder, DetectorError};
use schedwatch_runtime::realtime::{apply_process_setup, CgroupPaths};
use schedwatch_runtime::steal::select_platform_source;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::logging::{init_logging, LogTarget};

/// Exit status when the bounded wait fails.
const EXIT_WAIT_FAILURE: u8 = 2;

/// schedwatch command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "schedwatch",
    about = "Reports when the process is not scheduled on time",
    version,
    long_about = None
)]
struct Args {
    /// Increase log verbosity (-d debug, -dd trace).
    #[arg(short = 'd', action = ArgAction::Count)]
    debug: u8,

    /// Detach from the terminal and log to syslog.
    #[arg(short = 'D', conflicts_with = "foreground")]
    daemonize: bool,

    /// Stay in the foreground and log to stderr (default).
    #[arg(short = 'f')]
    foreground: bool,

    /// Do not set the SCHED_RR scheduler.
    #[arg(short = 'p')]
    no_priority: bool,

    /// Steal percent threshold above which a breach is attributed to the host.
    #[arg(short = 'm', value_name = "STEAL_TH", value_parser = parse_steal_threshold)]
    steal_threshold: Option<f64>,

    /// Move to the root cgroup only when needed (auto), always (on) or never (off).
    #[arg(short = 'P', value_name = "MODE")]
    cgroup: Option<CgroupMode>,

    /// Maximum allowed delay in milliseconds.
    #[arg(
        short = 't',
        value_name = "TIMEOUT",
        value_parser = clap::value_parser!(u64).range(1..=MAX_TIMEOUT_MS)
    )]
    timeout: Option<u64>,

    /// Path to a configuration file (TOML).
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,
}

fn parse_steal_threshold(s: &str) -> Result<f64, String> {
    match s.parse::<f64>() {
        Ok(v) if v.is_finite() && v > 0.0 => Ok(v),
        _ => Err(format!("Steal percent threshold {s} is invalid")),
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let config = match load_config(&args).and_then(|mut config| {
        apply_overrides(&mut config, &args);
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("schedwatch: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    if !config.foreground {
        if let Err(e) = process::detach_from_terminal() {
            eprintln!("schedwatch: {e:#}");
            return ExitCode::FAILURE;
        }
    }

    let target = if config.foreground {
        LogTarget::Stderr
    } else {
        LogTarget::Syslog
    };
    let _syslog = init_logging(config.debug, target);

    match run_watchdog(&config) {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Load configuration from file or use defaults.
///
/// Resolution priority (first existing file wins):
/// 1. Command-line `--config` argument
/// 2. `SCHEDWATCH_CONFIG_PATH` environment variable
/// 3. `/etc/schedwatch/config.toml` (system path)
/// 4. Built-in defaults
///
/// Logging is not initialized yet, so notices go to stderr.
fn load_config(args: &Args) -> Result<WatchdogConfig> {
    if let Some(config_path) = &args.config {
        return WatchdogConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()));
    }

    if let Ok(env_path) = std::env::var("SCHEDWATCH_CONFIG_PATH") {
        let config_path = PathBuf::from(&env_path);
        if config_path.exists() {
            return WatchdogConfig::from_file(&config_path).with_context(|| {
                format!("Failed to load config from SCHEDWATCH_CONFIG_PATH={env_path}")
            });
        }
        eprintln!(
            "schedwatch: SCHEDWATCH_CONFIG_PATH={env_path} does not exist, checking other locations"
        );
    }

    let system_path = PathBuf::from("/etc/schedwatch/config.toml");
    if system_path.exists() {
        return WatchdogConfig::from_file(&system_path)
            .with_context(|| format!("Failed to load config from {}", system_path.display()));
    }

    Ok(WatchdogConfig::default())
}

/// Command-line values take precedence over the configuration file.
fn apply_overrides(config: &mut WatchdogConfig, args: &Args) {
    if args.debug > 0 {
        config.debug = args.debug;
    }
    if args.daemonize {
        config.foreground = false;
    } else if args.foreground {
        config.foreground = true;
    }
    if args.no_priority {
        config.process.set_priority = false;
    }
    if let Some(threshold) = args.steal_threshold {
        config.steal_threshold = Some(threshold);
    }
    if let Some(mode) = args.cgroup {
        config.process.cgroup = mode;
    }
    if let Some(timeout_ms) = args.timeout {
        config.timeout = Duration::from_millis(timeout_ms);
    }
}

/// Set up the process, run the detection loop and tear down.
fn run_watchdog(config: &WatchdogConfig) -> Result<ExitCode> {
    info!(version = env!("CARGO_PKG_VERSION"), "Starting schedwatch");

    let status = apply_process_setup(&config.process, &CgroupPaths::default());
    if config.process.set_priority && status.rr_priority.is_none() {
        warn!("Running without SCHED_RR, reported delays include normal scheduling latency");
    }

    let control = Arc::new(ControlSignals::new());
    signals::install(Arc::clone(&control)).context("Failed to set up signal handlers")?;

    let selected = select_platform_source();
    let detection = config
        .detection_config(selected.default_threshold())
        .context("Invalid detection parameters")?;
    info!(backend = %selected.backend, "Steal time source selected");

    let mut detector = DetectorBuilder::new(selected.source, detection)
        .signals(control)
        .build();

    match detector.run() {
        Ok(_) => Ok(ExitCode::SUCCESS),
        Err(DetectorError::Suspend(e)) => {
            error!(error = %e, "poll error");
            Ok(ExitCode::from(EXIT_WAIT_FAILURE))
        }
        Err(e) => Err(e).context("Detection loop failed"),
    }
}
