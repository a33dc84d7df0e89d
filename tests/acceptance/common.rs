//! Common utilities for acceptance tests.
//!
//! Provides helpers for:
//! - Capturing emitted log events
//! - Scripting the clock, steal time, and waits of the detection loop
//! - Writing kernel CPU accounting fixtures

#![allow(dead_code)] // Not every helper is used by every test module

use schedwatch_common::time::MonotonicClock;
use schedwatch_runtime::control::ControlSignals;
use schedwatch_runtime::steal::{StealBackend, StealTimeError, StealTimeSource};
use schedwatch_runtime::suspend::{Suspender, WaitOutcome};
use std::collections::VecDeque;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

pub const MS: u64 = 1_000_000;

/// One captured log event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedEvent {
    pub level: Level,
    pub message: String,
}

/// Layer that records every event it sees.
#[derive(Debug, Clone, Default)]
pub struct LogCapture {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl LogCapture {
    /// All captured events in emission order.
    pub fn events(&self) -> Vec<CapturedEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Messages emitted at `level`.
    pub fn messages_at(&self, level: Level) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| e.level == level)
            .map(|e| e.message)
            .collect()
    }

    /// Number of statistics reports emitted.
    pub fn report_count(&self) -> usize {
        self.messages_at(Level::INFO)
            .iter()
            .filter(|m| m.starts_with("During "))
            .count()
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        }
    }
}

impl<S: Subscriber> Layer<S> for LogCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        self.events.lock().unwrap().push(CapturedEvent {
            level: *event.metadata().level(),
            message: visitor.message,
        });
    }
}

/// Run `f` with a capturing subscriber installed on this thread.
pub fn with_captured_logs<T>(f: impl FnOnce() -> T) -> (T, LogCapture) {
    let capture = LogCapture::default();
    let subscriber = tracing_subscriber::registry().with(capture.clone());
    let result = tracing::subscriber::with_default(subscriber, f);
    (result, capture)
}

/// Clock returning scripted readings, then repeating the last one.
#[derive(Debug, Default)]
pub struct ScriptedClock {
    readings: Mutex<VecDeque<u64>>,
    last: Mutex<u64>,
}

impl ScriptedClock {
    pub fn new(readings: impl IntoIterator<Item = u64>) -> Self {
        Self {
            readings: Mutex::new(readings.into_iter().collect()),
            last: Mutex::new(0),
        }
    }
}

impl MonotonicClock for ScriptedClock {
    fn now_ns(&self) -> u64 {
        let mut last = self.last.lock().unwrap();
        if let Some(next) = self.readings.lock().unwrap().pop_front() {
            *last = next;
        }
        *last
    }
}

/// Steal source returning scripted counters, then repeating the last one.
#[derive(Debug, Default)]
pub struct ScriptedSteal {
    readings: VecDeque<u64>,
    last: u64,
}

impl ScriptedSteal {
    pub fn new(readings: impl IntoIterator<Item = u64>) -> Self {
        Self {
            readings: readings.into_iter().collect(),
            last: 0,
        }
    }
}

impl StealTimeSource for ScriptedSteal {
    fn backend(&self) -> StealBackend {
        StealBackend::Kernel
    }

    fn read_steal_ns(&mut self) -> Result<u64, StealTimeError> {
        if let Some(next) = self.readings.pop_front() {
            self.last = next;
        }
        Ok(self.last)
    }
}

/// Wait that returns immediately and requests a stop after `waits` calls.
pub struct StopAfter {
    remaining: u32,
    control: Arc<ControlSignals>,
}

impl StopAfter {
    pub fn new(waits: u32, control: Arc<ControlSignals>) -> Self {
        Self {
            remaining: waits,
            control,
        }
    }
}

impl Suspender for StopAfter {
    fn suspend(&mut self, _timeout_ms: u64) -> io::Result<WaitOutcome> {
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            self.control.request_stop();
            return Ok(WaitOutcome::Interrupted);
        }
        Ok(WaitOutcome::Elapsed)
    }
}

/// Write a `/proc/stat` style fixture with the given aggregate steal ticks.
pub fn write_proc_stat(path: &Path, steal_ticks: u64) {
    let content = format!(
        "cpu  4705 356 584 3699176 23060 0 277 {steal_ticks} 0 0\n\
         cpu0 1393 280 208 924537 5660 0 83 999999 0 0\n\
         intr 114930548 113199788 3 0 5 263 0 4\n\
         ctxt 1990473\n"
    );
    fs::write(path, content).unwrap();
}
