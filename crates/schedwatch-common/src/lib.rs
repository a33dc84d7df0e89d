#![doc = "Common types shared across the schedwatch workspace."]

pub mod config;
pub mod error;
pub mod sample;
pub mod state;
pub mod stats;
pub mod time;

pub use config::*;
pub use error::*;
pub use sample::*;
pub use state::*;
pub use stats::*;
pub use time::*;

/// Program name used in reports and as the syslog identity.
pub const PROGRAM_NAME: &str = "schedwatch";
