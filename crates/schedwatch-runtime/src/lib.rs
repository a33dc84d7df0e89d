#![doc = "Detection loop for schedwatch: steal-time sources, bounded waits, and process setup."]

pub mod control;
pub mod detector;
pub mod realtime;
pub mod steal;
pub mod suspend;

pub use control::*;
pub use detector::*;
pub use realtime::*;
pub use steal::*;
pub use suspend::*;
