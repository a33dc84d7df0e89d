//! Stop and report requests against the real clock and `poll(2)`.
//!
//! # Acceptance Criteria
//!
//! - A stop requested during a wait ends the loop within one wait interval
//! - Exactly one final report is emitted after a stop
//! - A report request emits a report without disturbing the loop

use super::common::*;
use schedwatch_common::config::DetectionConfig;
use schedwatch_runtime::control::ControlSignals;
use schedwatch_runtime::detector::DetectorBuilder;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn test_stop_during_wait_emits_one_report() {
    let control = Arc::new(ControlSignals::new());
    let stopper = {
        let control = Arc::clone(&control);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            control.request_stop();
        })
    };

    let started = Instant::now();
    let ((report, cycles), logs) = with_captured_logs(|| {
        let mut detector = DetectorBuilder::new(
            Box::new(ScriptedSteal::new([0])),
            DetectionConfig::new(60, 10.0).unwrap(),
        )
        .signals(Arc::clone(&control))
        .build();
        let report = detector.run().unwrap();
        (report, detector.cycle_count())
    });
    stopper.join().unwrap();

    // 20ms waits: the stop is seen at the next cycle start
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(cycles >= 1);
    assert!(report.elapsed_ns >= 100 * MS);
    assert_eq!(logs.report_count(), 1);
    assert!(!control.stop_requested());
}

#[test]
fn test_dump_request_reports_and_continues() {
    let control = Arc::new(ControlSignals::new());
    control.request_dump();

    let clock = ScriptedClock::new([0, 0, 0, 50 * MS, 100 * MS]);
    let ((), logs) = with_captured_logs(|| {
        let mut detector = DetectorBuilder::new(
            Box::new(ScriptedSteal::new([0])),
            DetectionConfig::new(200, 10.0).unwrap(),
        )
        .clock(clock)
        .suspender(StopAfter::new(2, Arc::clone(&control)))
        .signals(Arc::clone(&control))
        .build();
        detector.run().unwrap();
        assert_eq!(detector.cycle_count(), 2);
    });

    // One requested report plus the final one
    assert_eq!(logs.report_count(), 2);
    assert!(!control.take_dump_request());
}

#[test]
fn test_reports_are_non_decreasing() {
    let control = Arc::new(ControlSignals::new());
    // Initial report, then each cycle's end reading followed by a report
    let clock = ScriptedClock::new([0, 0, 300 * MS, 300 * MS, 400 * MS, 400 * MS, 900 * MS]);
    let mut detector = DetectorBuilder::new(
        Box::new(ScriptedSteal::new([0])),
        DetectionConfig::new(200, 10.0).unwrap(),
    )
    .clock(clock)
    .suspender(StopAfter::new(10, Arc::clone(&control)))
    .signals(control)
    .build();

    let mut previous = detector.report();
    for _ in 0..3 {
        detector.run_cycle().unwrap();
        let report = detector.report();
        assert!(report.elapsed_ns >= previous.elapsed_ns);
        assert!(report.not_scheduled_count >= previous.not_scheduled_count);
        previous = report;
    }

    // 300ms and 500ms breaches; the 100ms cycle is on time
    assert_eq!(previous.not_scheduled_count, 2);
    assert_eq!(detector.report(), previous);
}
