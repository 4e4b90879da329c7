//! Common utilities for acceptance tests.
//!
//! Provides helpers for:
//! - Wiring a generator to named in-process connections
//! - Publishing time-sync samples
//! - Summarizing emitted event timestamps

#![allow(dead_code)]

use hsi_common::config::HsiConfig;
use hsi_common::time::system_time_us;
use hsi_dataformats::{FrameBytes, HsiEvent, HsiFrame, TimeSync};
use hsi_link::{ChannelReceiver, ChannelSender, ConnectionRegistry, OutputSender, TimeSyncReceiver};
use hsi_runtime::generator::{FakeHsiEventGenerator, StartParams};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// DAQ clock used by the tests: one tick per microsecond.
pub const TEST_CLOCK_HZ: u64 = 1_000_000;

/// DAQ time carried by the first time-sync sample of every run.
pub const TIMESYNC_BASE: u64 = 5_000_000;

/// Configuration with fast startup probes and a reproducible PRNG.
pub fn test_config(rate_hz: f64) -> HsiConfig {
    let mut config = HsiConfig::default();
    config.generator.clock_frequency_hz = TEST_CLOCK_HZ;
    config.generator.trigger_rate_hz = rate_hz;
    config.generator.hsi_device_id = 3;
    config.generator.random_seed = Some(2024);
    config.connections.queue_capacity = 100_000;
    config.startup.ready_attempts = 3;
    config.startup.ready_wait = Duration::from_millis(10);
    config
}

/// A generator wired to its three connections.
pub struct Harness {
    pub registry: Arc<ConnectionRegistry>,
    pub generator: FakeHsiEventGenerator,
    pub timesync: ChannelSender<TimeSync>,
}

impl Harness {
    /// Declare the connections named in `config` and create the generator.
    ///
    /// No consumer is attached to the output connections yet.
    pub fn new(config: &HsiConfig) -> Self {
        let connections = &config.connections;
        let registry = Arc::new(ConnectionRegistry::new());
        registry.declare::<HsiEvent>(&connections.hsievent, connections.queue_capacity);
        registry.declare::<FrameBytes>(&connections.raw_data, connections.queue_capacity);
        registry.declare::<TimeSync>(&connections.timesync, 64);

        let timesync_rx = registry
            .receiver::<TimeSync>(&connections.timesync)
            .expect("timesync connection declared");
        let timesync = registry
            .sender::<TimeSync>(&connections.timesync)
            .expect("timesync connection declared");

        let generator = FakeHsiEventGenerator::new(
            "fakehsi",
            Arc::clone(&registry),
            TimeSyncReceiver::new(timesync_rx),
        );

        Self {
            registry,
            generator,
            timesync,
        }
    }

    /// Attach consumers to both output connections.
    pub fn attach(&self, config: &HsiConfig) -> Outputs {
        Outputs {
            events: self
                .registry
                .receiver::<HsiEvent>(&config.connections.hsievent)
                .expect("hsievent connection declared"),
            frames: self
                .registry
                .receiver::<FrameBytes>(&config.connections.raw_data)
                .expect("raw_data connection declared"),
        }
    }

    /// Start `run_number` and feed it one time-sync sample.
    pub fn start_run(&mut self, run_number: u32, trigger_rate: Option<f64>) {
        self.generator
            .start(StartParams {
                run_number,
                trigger_rate,
            })
            .expect("run starts");
        self.publish_timesync(run_number);
    }

    /// Publish a sample anchoring the DAQ clock at [`TIMESYNC_BASE`] now.
    pub fn publish_timesync(&self, run_number: u32) {
        let sample = TimeSync {
            daq_time: TIMESYNC_BASE,
            system_time_us: system_time_us(),
            sequence_number: 1,
            run_number,
            source_pid: std::process::id(),
        };
        self.timesync
            .send(sample, Duration::from_millis(100))
            .expect("timesync queue has room");
    }

    /// Block until `n` events have been generated this run.
    pub fn wait_for_generated(&self, n: u64, timeout: Duration) -> bool {
        let counters = self.generator.counters();
        wait_until(timeout, || counters.generated() >= n)
    }
}

/// Consumer ends of the output connections.
pub struct Outputs {
    pub events: ChannelReceiver<HsiEvent>,
    pub frames: ChannelReceiver<FrameBytes>,
}

impl Outputs {
    /// Take everything queued, decoding the frames.
    pub fn drain(&self) -> (Vec<HsiEvent>, Vec<HsiFrame>) {
        let events = self.events.drain();
        let frames = self
            .frames
            .drain()
            .iter()
            .map(|bytes| HsiFrame::from_bytes(bytes).expect("emitted frame decodes"))
            .collect();
        (events, frames)
    }
}

/// Poll `condition` every millisecond until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    condition()
}

/// Mean spacing between consecutive event timestamps, in DAQ ticks.
pub fn mean_spacing(events: &[HsiEvent]) -> f64 {
    assert!(events.len() >= 2, "need at least two events");
    let span = events[events.len() - 1].timestamp - events[0].timestamp;
    span as f64 / (events.len() - 1) as f64
}

/// Assert that sequence counters run 1, 2, 3, ... without gaps.
pub fn assert_contiguous_from_one(events: &[HsiEvent]) {
    for (i, event) in events.iter().enumerate() {
        assert_eq!(
            event.sequence_counter,
            i as u64 + 1,
            "sequence gap at index {i}"
        );
    }
}
