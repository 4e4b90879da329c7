//! Rate accuracy acceptance tests.
//!
//! Event timestamps come from the DAQ clock estimate taken when each tick
//! fires, so their spacing measures the scheduler's actual tick spacing.
//! The test clock runs at 1 MHz: one tick is one microsecond.
//!
//! # Acceptance Criteria
//!
//! - 1000 ticks at 1000 Hz span one second within a few percent
//! - A mid-run rate change alters the spacing without resetting sequences

use super::common::{assert_contiguous_from_one, mean_spacing, test_config, Harness};
use std::time::Duration;

/// Absolute deadlines keep the long-run period exact.
#[test]
fn test_rate_accuracy_1000_ticks_at_1khz() {
    let config = test_config(1000.0);
    let mut harness = Harness::new(&config);
    let outputs = harness.attach(&config);

    harness.generator.configure(config.clone()).unwrap();
    harness.start_run(1, None);

    assert!(
        harness.wait_for_generated(1000, Duration::from_secs(10)),
        "1000 events not generated in time"
    );
    harness.generator.stop().unwrap();

    let (events, frames) = outputs.drain();
    assert!(events.len() >= 1000);
    assert_eq!(events.len(), frames.len());
    assert_contiguous_from_one(&events);

    // 999 periods of 1ms between the first and the 1000th event
    let span_us = events[999].timestamp - events[0].timestamp;
    println!("1000 ticks at 1 kHz spanned {span_us} us");
    assert!(span_us >= 990_000, "span {span_us} us too short");
    assert!(span_us <= 1_060_000, "span {span_us} us too long");

    let metrics = harness.generator.last_tick_metrics().expect("run reported tick metrics");
    assert!(metrics.total_ticks() >= 1000);
}

/// A rate override applies to one run only.
#[test]
fn test_start_override_sets_rate() {
    let config = test_config(10.0);
    let mut harness = Harness::new(&config);
    let outputs = harness.attach(&config);

    harness.generator.configure(config.clone()).unwrap();
    harness.start_run(1, Some(500.0));
    assert!(harness.wait_for_generated(101, Duration::from_secs(5)));
    harness.generator.stop().unwrap();

    let (events, _) = outputs.drain();
    let spacing = mean_spacing(&events[..=100]);
    assert!((1_800.0..=2_400.0).contains(&spacing), "spacing {spacing} us");

    // Base rate restored after stop
    assert!((harness.generator.active_rate() - 10.0).abs() < f64::EPSILON);
}

/// 10 Hz → 100 Hz mid-run.
#[test]
fn test_rate_change_mid_run() {
    let config = test_config(10.0);
    let mut harness = Harness::new(&config);
    let outputs = harness.attach(&config);

    harness.generator.configure(config.clone()).unwrap();
    harness.start_run(7, None);

    assert!(harness.wait_for_generated(6, Duration::from_secs(5)));
    let changed_at = harness.generator.counters().generated() as usize;
    harness.generator.change_rate(100.0).unwrap();

    let target = changed_at as u64 + 60;
    assert!(harness.wait_for_generated(target, Duration::from_secs(5)));
    harness.generator.stop().unwrap();

    let (events, _) = outputs.drain();
    assert_contiguous_from_one(&events);
    assert!(events.iter().all(|e| e.run_number == 7));

    let before = mean_spacing(&events[..changed_at]);
    let after = mean_spacing(&events[changed_at + 1..]);
    println!("spacing before {before:.0} us, after {after:.0} us");

    assert!((95_000.0..=110_000.0).contains(&before), "before {before} us");
    assert!((9_000.0..=12_000.0).contains(&after), "after {after} us");
}

/// Rate 0 suspends emission without ending the run.
#[test]
fn test_zero_rate_suspends_emission() {
    let config = test_config(200.0);
    let mut harness = Harness::new(&config);
    let outputs = harness.attach(&config);

    harness.generator.configure(config.clone()).unwrap();
    harness.start_run(1, None);
    assert!(harness.wait_for_generated(5, Duration::from_secs(5)));

    harness.generator.change_rate(0.0).unwrap();
    // Let an in-flight tick finish before sampling the count
    std::thread::sleep(Duration::from_millis(20));
    let paused_at = harness.generator.counters().generated();
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(harness.generator.counters().generated(), paused_at);

    harness.generator.change_rate(200.0).unwrap();
    assert!(harness.wait_for_generated(paused_at + 5, Duration::from_secs(5)));
    harness.generator.stop().unwrap();

    let (events, _) = outputs.drain();
    assert_contiguous_from_one(&events);
}
