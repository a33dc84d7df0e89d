//! End-to-end detection loop acceptance tests.
//!
//! Drive the detector through complete runs and check what an operator
//! would see in the log: breach lines, the host overload hint, and the
//! final statistics report.

use super::common::*;
use schedwatch_common::config::DetectionConfig;
use schedwatch_runtime::control::ControlSignals;
use schedwatch_runtime::detector::DetectorBuilder;
use schedwatch_runtime::steal::{KernelStealSource, StealTimeSource};
use std::sync::Arc;
use tracing::Level;

#[test]
fn test_breach_with_host_overload() {
    let control = Arc::new(ControlSignals::new());
    // Statistics start, cycle start, cycle end
    let clock = ScriptedClock::new([0, 0, 300 * MS]);
    let steal = ScriptedSteal::new([0, 60 * MS]);

    let (report, logs) = with_captured_logs(|| {
        DetectorBuilder::new(Box::new(steal), DetectionConfig::new(200, 10.0).unwrap())
            .clock(clock)
            .suspender(StopAfter::new(1, Arc::clone(&control)))
            .signals(Arc::clone(&control))
            .build()
            .run()
            .unwrap()
    });

    assert_eq!(report.not_scheduled_count, 1);
    assert_eq!(
        logs.messages_at(Level::ERROR),
        vec!["Not scheduled for 0.3000s (threshold is 0.2000s), steal time is 0.0600s (20.00%)"]
    );
    assert_eq!(
        logs.messages_at(Level::WARN),
        vec!["Steal time is > 10.0%, this is usually because of overloaded host machine"]
    );

    let info = logs.messages_at(Level::INFO);
    assert_eq!(
        info.first().map(String::as_str),
        Some("Running main loop with maximum timeout 200ms and steal threshold 10%")
    );
    assert_eq!(
        info.last().map(String::as_str),
        Some("During 0.3000s runtime schedwatch was 1x not scheduled on time")
    );
    assert_eq!(logs.report_count(), 1);
}

#[test]
fn test_zero_steal_never_warns() {
    let dir = tempfile::tempdir().unwrap();
    let stat = dir.path().join("stat");
    write_proc_stat(&stat, 0);

    let control = Arc::new(ControlSignals::new());
    let clock = ScriptedClock::new([0, 0, 500 * MS, 1000 * MS, 1500 * MS]);
    let steal = KernelStealSource::new().with_path(&stat);

    let (report, logs) = with_captured_logs(|| {
        DetectorBuilder::new(Box::new(steal), DetectionConfig::new(200, 0.5).unwrap())
            .clock(clock)
            .suspender(StopAfter::new(3, Arc::clone(&control)))
            .signals(Arc::clone(&control))
            .build()
            .run()
            .unwrap()
    });

    assert_eq!(report.not_scheduled_count, 3);
    assert_eq!(logs.messages_at(Level::ERROR).len(), 3);
    assert!(logs.messages_at(Level::WARN).is_empty());
}

#[test]
fn test_unreadable_steal_is_not_fatal() {
    let control = Arc::new(ControlSignals::new());
    let clock = ScriptedClock::new([0, 0, 250 * MS]);
    let steal = KernelStealSource::new().with_path("/nonexistent/schedwatch/stat");

    let (report, logs) = with_captured_logs(|| {
        DetectorBuilder::new(Box::new(steal), DetectionConfig::new(200, 10.0).unwrap())
            .clock(clock)
            .suspender(StopAfter::new(1, Arc::clone(&control)))
            .signals(Arc::clone(&control))
            .build()
            .run()
            .unwrap()
    });

    assert_eq!(report.not_scheduled_count, 1);
    assert_eq!(
        logs.messages_at(Level::ERROR),
        vec!["Not scheduled for 0.2500s (threshold is 0.2000s), steal time is 0.0000s (0.00%)"]
    );
}

#[test]
fn test_kernel_steal_delta_from_fixture() {
    let dir = tempfile::tempdir().unwrap();
    let stat = dir.path().join("stat");
    write_proc_stat(&stat, 100);

    let mut source = KernelStealSource::new()
        .with_path(&stat)
        .with_clock_ticks(Some(100));

    let before = source.sample();
    write_proc_stat(&stat, 130);
    let after = source.sample();

    // Per-core lines must not leak into the aggregate
    assert_eq!(before, 1_000_000_000);
    assert_eq!(after - before, 300 * MS);
}

#[test]
fn test_on_time_run_reports_zero() {
    let control = Arc::new(ControlSignals::new());
    let clock = ScriptedClock::new([0, 0, 60 * MS, 120 * MS, 180 * MS, 240 * MS]);

    let (report, logs) = with_captured_logs(|| {
        DetectorBuilder::new(
            Box::new(ScriptedSteal::new([0])),
            DetectionConfig::new(200, 10.0).unwrap(),
        )
        .clock(clock)
        .suspender(StopAfter::new(4, Arc::clone(&control)))
        .signals(Arc::clone(&control))
        .build()
        .run()
        .unwrap()
    });

    assert_eq!(report.not_scheduled_count, 0);
    assert!(logs.messages_at(Level::ERROR).is_empty());
    assert_eq!(
        logs.messages_at(Level::INFO).last().map(String::as_str),
        Some("During 0.2400s runtime schedwatch was 0x not scheduled on time")
    );
}
