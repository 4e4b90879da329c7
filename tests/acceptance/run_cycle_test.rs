//! Run lifecycle acceptance tests.

use super::common::{assert_contiguous_from_one, test_config, Harness};
use hsi_common::config::HsiConfig;
use hsi_common::error::HsiError;
use hsi_common::state::ModuleState;
use hsi_runtime::generator::StartParams;
use std::io::Write;
use std::thread;
use std::time::{Duration, Instant};

/// Sequence counters restart at 1 for every run.
#[test]
fn test_stop_start_resets_sequence() {
    let config = test_config(500.0);
    let mut harness = Harness::new(&config);
    let outputs = harness.attach(&config);
    harness.generator.configure(config.clone()).unwrap();

    harness.start_run(1, None);
    assert!(harness.wait_for_generated(20, Duration::from_secs(5)));
    harness.generator.stop().unwrap();
    let (first_run, _) = outputs.drain();
    assert_contiguous_from_one(&first_run);
    assert!(first_run.iter().all(|e| e.run_number == 1));

    harness
        .generator
        .start(StartParams {
            run_number: 2,
            trigger_rate: None,
        })
        .unwrap();

    // A sample for another run must not validate the estimate
    harness.publish_timesync(1);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(harness.generator.counters().generated(), 0);
    assert!(outputs.events.drain().is_empty());

    harness.publish_timesync(2);
    assert!(harness.wait_for_generated(10, Duration::from_secs(5)));
    harness.generator.stop().unwrap();

    let (second_run, frames) = outputs.drain();
    assert_contiguous_from_one(&second_run);
    assert!(second_run.iter().all(|e| e.run_number == 2));
    assert_eq!(frames[0].sequence, 1);
    assert_eq!(harness.generator.info().run_number, Some(2));
}

/// Nothing is emitted, and stop stays prompt, when no time-sync ever arrives.
#[test]
fn test_stop_while_waiting_for_timestamp() {
    let config = test_config(1000.0);
    let mut harness = Harness::new(&config);
    let outputs = harness.attach(&config);
    harness.generator.configure(config.clone()).unwrap();

    harness
        .generator
        .start(StartParams {
            run_number: 5,
            trigger_rate: None,
        })
        .unwrap();
    thread::sleep(Duration::from_millis(100));

    let stop_started = Instant::now();
    harness.generator.stop().unwrap();
    assert!(stop_started.elapsed() < Duration::from_millis(500));

    let (events, frames) = outputs.drain();
    assert!(events.is_empty());
    assert!(frames.is_empty());
    assert_eq!(harness.generator.state(), ModuleState::Stopped);
}

/// No consumer on an output connection is a fatal start error.
#[test]
fn test_start_fails_without_consumer() {
    let config = test_config(100.0);
    let mut harness = Harness::new(&config);
    harness.generator.configure(config.clone()).unwrap();

    let started = Instant::now();
    let err = harness
        .generator
        .start(StartParams {
            run_number: 1,
            trigger_rate: None,
        })
        .unwrap_err();
    assert!(matches!(err, HsiError::SenderReadyTimeout { attempts: 3, .. }), "{err}");
    // Probe plus three waits of 10ms
    assert!(started.elapsed() >= Duration::from_millis(30));
    assert_eq!(harness.generator.state(), ModuleState::Configured);

    // Attaching the consumers lets the same module start
    let outputs = harness.attach(&config);
    harness.start_run(1, None);
    assert!(harness.wait_for_generated(3, Duration::from_secs(5)));
    harness.generator.stop().unwrap();
    assert!(!outputs.events.drain().is_empty());
}

/// Invalid rates are rejected before any state change.
#[test]
fn test_invalid_rates_rejected() {
    let config = test_config(100.0);
    let mut harness = Harness::new(&config);
    let _outputs = harness.attach(&config);

    let mut bad = config.clone();
    bad.generator.trigger_rate_hz = -1.0;
    assert!(matches!(
        harness.generator.configure(bad),
        Err(HsiError::InvalidTriggerRate(_))
    ));
    assert_eq!(harness.generator.state(), ModuleState::Initial);

    harness.generator.configure(config.clone()).unwrap();
    assert!(harness
        .generator
        .start(StartParams {
            run_number: 1,
            trigger_rate: Some(0.0),
        })
        .is_err());
    assert_eq!(harness.generator.state(), ModuleState::Configured);

    harness.start_run(1, None);
    assert!(matches!(
        harness.generator.change_rate(f64::NAN),
        Err(HsiError::InvalidTriggerRate(_))
    ));
    harness.generator.stop().unwrap();
    assert!(harness.generator.change_rate(10.0).is_err());
}

/// Full lifecycle driven from a configuration file.
#[test]
fn test_lifecycle_from_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[generator]
clock_frequency_hz = 1000000
trigger_rate_hz = 250.0
hsi_device_id = 9
signal_emulation_mode = "all_ones"
enabled_signals = 0x0F

[connections]
hsievent = "mlt_input"
raw_data = "dlh_input"

[startup]
ready_attempts = 2
ready_wait = "10ms"
"#
    )
    .unwrap();

    let config = HsiConfig::from_file(file.path()).unwrap();
    let mut harness = Harness::new(&config);
    let outputs = harness.attach(&config);

    harness.generator.configure(config.clone()).unwrap();
    harness.start_run(3, None);
    assert!(harness.wait_for_generated(10, Duration::from_secs(5)));
    harness.generator.stop().unwrap();

    let (events, frames) = outputs.drain();
    assert!(events.iter().all(|e| e.device_id() == 9 && e.signal_map == 0x0F));
    assert!(frames.iter().all(|f| f.input_low == u32::MAX && f.trigger == 0x0F));

    // Reconfigure after stop, then release
    harness.generator.configure(config).unwrap();
    harness.generator.scrap().unwrap();
    assert_eq!(harness.generator.state(), ModuleState::Initial);
}
