//! Global DAQ clock estimation from time-sync samples.
//!
//! Each accepted sample anchors the estimate: the sample's DAQ time is
//! advanced by the wall-clock lag between publication and receipt, and from
//! then on by local monotonic time at the configured clock frequency. The
//! value handed out never decreases, even when samples arrive out of order.

use hsi_common::cancel::CancelToken;
use hsi_common::error::{HsiError, HsiResult};
use hsi_common::time::{duration_to_ticks, system_time_us, Timestamp};
use hsi_dataformats::TimeSync;
use hsi_link::TimeSyncSink;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Result of waiting for the first usable sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// A valid estimate is available.
    Ready,
    /// Cancellation was requested before any usable sample arrived.
    Interrupted,
}

/// DAQ time paired with the local instant it was valid at.
#[derive(Debug, Clone, Copy)]
struct Anchor {
    daq_time: Timestamp,
    at: Instant,
}

/// Running estimate of the global DAQ clock for one run.
#[derive(Debug)]
pub struct TimestampSynchronizer {
    run_number: u32,
    clock_frequency_hz: u64,
    anchor: Mutex<Option<Anchor>>,
    anchor_set: Condvar,
    /// Highest estimate returned so far.
    floor: AtomicU64,
    received: AtomicU64,
}

impl TimestampSynchronizer {
    /// Create an estimator that accepts samples for `run_number` only.
    #[must_use]
    pub fn new(run_number: u32, clock_frequency_hz: u64) -> Self {
        Self {
            run_number,
            clock_frequency_hz,
            anchor: Mutex::new(None),
            anchor_set: Condvar::new(),
            floor: AtomicU64::new(0),
            received: AtomicU64::new(0),
        }
    }

    /// Run this estimator belongs to.
    #[must_use]
    pub fn run_number(&self) -> u32 {
        self.run_number
    }

    /// Number of time-sync samples delivered, including ignored ones.
    #[must_use]
    pub fn received_timesync_count(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Whether at least one usable sample has been ingested.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.lock_anchor().is_some()
    }

    /// Feed one sample, using the current wall clock as the receipt time.
    pub fn ingest(&self, sample: &TimeSync) {
        self.ingest_at(sample, system_time_us(), Instant::now());
    }

    fn ingest_at(&self, sample: &TimeSync, now_us: u64, now: Instant) {
        self.received.fetch_add(1, Ordering::Relaxed);

        if !sample.is_valid_for(self.run_number) {
            trace!(
                daq_time = sample.daq_time,
                sample_run = sample.run_number,
                run = self.run_number,
                "Ignoring time-sync sample"
            );
            return;
        }

        // Samples stamped in the future are treated as just published.
        let lag = Duration::from_micros(now_us.saturating_sub(sample.system_time_us));
        let candidate = sample
            .daq_time
            .saturating_add(duration_to_ticks(lag, self.clock_frequency_hz));

        let mut anchor = self.lock_anchor();
        let first = anchor.is_none();
        let current = (*anchor).map(|a| self.extrapolate(a, now));
        if current.map_or(true, |current| candidate >= current) {
            *anchor = Some(Anchor {
                daq_time: candidate,
                at: now,
            });
        }
        drop(anchor);

        if first {
            debug!(
                daq_time = sample.daq_time,
                estimate = candidate,
                run = self.run_number,
                "First valid time-sync sample received"
            );
            self.anchor_set.notify_all();
        }
    }

    /// Block until an estimate is available or `cancel` is set.
    ///
    /// The cancellation flag is re-checked at least every millisecond.
    pub fn wait_for_valid(&self, cancel: &CancelToken) -> WaitOutcome {
        const CHECK_INTERVAL: Duration = Duration::from_millis(1);

        let mut anchor = self.lock_anchor();
        loop {
            if anchor.is_some() {
                return WaitOutcome::Ready;
            }
            if cancel.is_cancelled() {
                return WaitOutcome::Interrupted;
            }
            anchor = match self.anchor_set.wait_timeout(anchor, CHECK_INTERVAL) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// Current estimate of the DAQ clock.
    ///
    /// # Errors
    ///
    /// Returns [`HsiError::TimestampUnavailable`] before the first usable sample.
    pub fn current_estimate(&self) -> HsiResult<Timestamp> {
        self.estimate_at(Instant::now())
    }

    fn estimate_at(&self, now: Instant) -> HsiResult<Timestamp> {
        let anchor = (*self.lock_anchor()).ok_or(HsiError::TimestampUnavailable)?;
        let estimate = self.extrapolate(anchor, now);
        let previous = self.floor.fetch_max(estimate, Ordering::AcqRel);
        Ok(estimate.max(previous))
    }

    fn extrapolate(&self, anchor: Anchor, now: Instant) -> Timestamp {
        let elapsed = now.saturating_duration_since(anchor.at);
        anchor
            .daq_time
            .saturating_add(duration_to_ticks(elapsed, self.clock_frequency_hz))
    }

    fn lock_anchor(&self) -> std::sync::MutexGuard<'_, Option<Anchor>> {
        self.anchor.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl TimeSyncSink for TimestampSynchronizer {
    fn on_timesync(&self, sample: &TimeSync) {
        self.ingest(sample);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    const CLOCK_HZ: u64 = 62_500_000;

    fn sample(daq_time: u64, system_time_us: u64, run_number: u32) -> TimeSync {
        TimeSync {
            daq_time,
            system_time_us,
            sequence_number: 0,
            run_number,
            source_pid: 1,
        }
    }

    #[test]
    fn test_invalid_before_first_sample() {
        let sync = TimestampSynchronizer::new(1, CLOCK_HZ);
        assert!(!sync.is_valid());
        assert_eq!(sync.current_estimate(), Err(HsiError::TimestampUnavailable));
    }

    #[test]
    fn test_sample_lag_is_extrapolated() {
        let sync = TimestampSynchronizer::new(1, CLOCK_HZ);
        let now = Instant::now();
        // Published 1ms before receipt: 62_500 ticks of lag
        sync.ingest_at(&sample(1_000_000, 10_000, 1), 11_000, now);

        assert_eq!(sync.estimate_at(now).unwrap(), 1_062_500);
        let later = now + Duration::from_millis(2);
        assert_eq!(sync.estimate_at(later).unwrap(), 1_062_500 + 125_000);
    }

    #[test]
    fn test_future_sample_has_no_lag() {
        let sync = TimestampSynchronizer::new(1, CLOCK_HZ);
        let now = Instant::now();
        sync.ingest_at(&sample(500, 20_000, 1), 10_000, now);
        assert_eq!(sync.estimate_at(now).unwrap(), 500);
    }

    #[test]
    fn test_ignores_zero_and_foreign_run() {
        let sync = TimestampSynchronizer::new(7, CLOCK_HZ);
        sync.ingest(&sample(0, system_time_us(), 7));
        sync.ingest(&sample(1_000, system_time_us(), 8));

        assert!(!sync.is_valid());
        assert_eq!(sync.received_timesync_count(), 2);
    }

    #[test]
    fn test_estimate_never_moves_backward() {
        let sync = TimestampSynchronizer::new(1, CLOCK_HZ);
        let now = Instant::now();
        sync.ingest_at(&sample(10_000_000, 0, 1), 0, now);
        let first = sync.estimate_at(now).unwrap();

        // Stale, out-of-order sample
        sync.ingest_at(&sample(5_000_000, 0, 1), 0, now);
        let second = sync.estimate_at(now).unwrap();
        assert!(second >= first);

        // A newer sample moves the anchor forward
        sync.ingest_at(&sample(20_000_000, 0, 1), 0, now);
        assert_eq!(sync.estimate_at(now).unwrap(), 20_000_000);
    }

    #[test]
    fn test_wait_interrupted_without_samples() {
        let sync = TimestampSynchronizer::new(1, CLOCK_HZ);
        let cancel = CancelToken::new();
        let canceller = cancel.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            canceller.cancel();
        });

        assert_eq!(sync.wait_for_valid(&cancel), WaitOutcome::Interrupted);
        handle.join().unwrap();
    }

    #[test]
    fn test_wait_ready_after_first_sample() {
        let sync = Arc::new(TimestampSynchronizer::new(3, CLOCK_HZ));
        let feeder = Arc::clone(&sync);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            feeder.on_timesync(&sample(42_000, system_time_us(), 3));
        });

        let start = Instant::now();
        assert_eq!(sync.wait_for_valid(&CancelToken::new()), WaitOutcome::Ready);
        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(sync.current_estimate().unwrap() >= 42_000);
        handle.join().unwrap();
    }

    #[test]
    fn test_concurrent_readers_see_monotonic_values() {
        let sync = Arc::new(TimestampSynchronizer::new(1, CLOCK_HZ));
        sync.ingest(&sample(1_000, system_time_us(), 1));

        let feeder = Arc::clone(&sync);
        let writer = thread::spawn(move || {
            for i in 0..200u64 {
                // Alternate fresh and stale samples
                let daq = if i % 2 == 0 { 1_000 + i * 10_000 } else { 1_000 };
                feeder.ingest(&sample(daq, system_time_us(), 1));
            }
        });

        let mut last = 0;
        for _ in 0..2_000 {
            let value = sync.current_estimate().unwrap();
            assert!(value >= last);
            last = value;
        }
        writer.join().unwrap();
    }
}
