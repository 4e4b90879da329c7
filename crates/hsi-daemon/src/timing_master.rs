//! Simulated timing master.
//!
//! Publishes a [`TimeSync`] sample every `interval`, pairing the current wall
//! clock with a DAQ clock derived from it at the configured frequency.

use hsi_common::cancel::CancelToken;
use hsi_common::error::{HsiError, HsiResult};
use hsi_common::time::{duration_to_ticks, system_time_us};
use hsi_dataformats::TimeSync;
use hsi_link::{ChannelSender, OutputSender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Longest wait for a free queue slot before a sample is dropped.
const PUBLISH_TIMEOUT: Duration = Duration::from_millis(10);

/// Publisher thread handle. Stops on drop.
#[derive(Debug)]
pub struct TimingMaster {
    cancel: CancelToken,
    handle: Option<JoinHandle<u64>>,
}

impl TimingMaster {
    /// Start publishing samples for `run_number`.
    ///
    /// # Errors
    ///
    /// Returns [`HsiError::Thread`] if the publisher thread cannot be spawned.
    pub fn start(
        sender: ChannelSender<TimeSync>,
        run_number: u32,
        clock_frequency_hz: u64,
        interval: Duration,
    ) -> HsiResult<Self> {
        let cancel = CancelToken::new();
        let thread_cancel = cancel.clone();

        let handle = thread::Builder::new()
            .name("hsi-timing".into())
            .spawn(move || {
                publish_loop(&sender, run_number, clock_frequency_hz, interval, &thread_cancel)
            })
            .map_err(|e| HsiError::Thread(format!("failed to spawn timing master: {e}")))?;

        info!(run_number, interval_ms = interval.as_millis(), "Timing master started");
        Ok(Self {
            cancel,
            handle: Some(handle),
        })
    }

    /// Stop publishing and return the number of samples sent.
    pub fn stop(&mut self) -> u64 {
        let Some(handle) = self.handle.take() else {
            return 0;
        };
        self.cancel.cancel();
        match handle.join() {
            Ok(published) => {
                info!(published, "Timing master stopped");
                published
            }
            Err(_) => {
                warn!("Timing master thread panicked");
                0
            }
        }
    }
}

impl Drop for TimingMaster {
    fn drop(&mut self) {
        self.stop();
    }
}

/// DAQ clock value at wall-clock time `now_us`.
fn daq_time_at(now_us: u64, clock_frequency_hz: u64) -> u64 {
    duration_to_ticks(Duration::from_micros(now_us), clock_frequency_hz)
}

fn publish_loop(
    sender: &ChannelSender<TimeSync>,
    run_number: u32,
    clock_frequency_hz: u64,
    interval: Duration,
    cancel: &CancelToken,
) -> u64 {
    let source_pid = std::process::id();
    let slice = interval.min(Duration::from_millis(5));
    let mut sequence_number = 0u64;
    let mut next = Instant::now();

    while !cancel.is_cancelled() {
        let now_us = system_time_us();
        let sample = TimeSync {
            daq_time: daq_time_at(now_us, clock_frequency_hz),
            system_time_us: now_us,
            sequence_number: sequence_number + 1,
            run_number,
            source_pid,
        };

        match sender.send(sample, PUBLISH_TIMEOUT) {
            Ok(()) => {
                sequence_number += 1;
                trace!(daq_time = sample.daq_time, sequence_number, "Published time-sync");
            }
            Err(e) => debug!(timeout = e.is_timeout(), "Time-sync sample dropped"),
        }

        next += interval;
        if !cancel.sleep_until(next, slice) {
            break;
        }
    }
    sequence_number
}
