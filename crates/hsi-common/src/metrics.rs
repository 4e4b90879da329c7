//! Run counters and tick timing metrics.
//!
//! [`GeneratorCounters`] is shared between the generation thread, the
//! dispatcher, and monitoring readers. Every field is an independent atomic:
//! readers may see a slightly stale mix of values, which is acceptable for
//! monitoring. All counters are zeroed at the start of each run.
//!
//! [`TickMetrics`] is owned by the scheduler thread and tracks how late each
//! tick fired relative to its scheduled deadline, using a ring buffer so that
//! recording never allocates.

use crossbeam_utils::CachePadded;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Counters for one generator instance.
#[derive(Debug, Default)]
pub struct GeneratorCounters {
    generated: CachePadded<AtomicU64>,
    sent: CachePadded<AtomicU64>,
    sent_frames: CachePadded<AtomicU64>,
    failed_to_send: CachePadded<AtomicU64>,
    last_generated_timestamp: CachePadded<AtomicU64>,
    last_sent_timestamp: CachePadded<AtomicU64>,
}

impl GeneratorCounters {
    /// Create zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero every counter. Called when a run starts generating.
    pub fn reset(&self) {
        self.generated.store(0, Ordering::Relaxed);
        self.sent.store(0, Ordering::Relaxed);
        self.sent_frames.store(0, Ordering::Relaxed);
        self.failed_to_send.store(0, Ordering::Relaxed);
        self.last_generated_timestamp.store(0, Ordering::Relaxed);
        self.last_sent_timestamp.store(0, Ordering::Relaxed);
    }

    /// Record a generated event; returns the new generated count.
    pub fn record_generated(&self, timestamp: u64) -> u64 {
        self.last_generated_timestamp.store(timestamp, Ordering::Relaxed);
        self.generated.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Record a structured event delivered downstream.
    pub fn record_sent(&self, timestamp: u64) {
        self.sent.fetch_add(1, Ordering::Relaxed);
        self.last_sent_timestamp.store(timestamp, Ordering::Relaxed);
    }

    /// Record a raw frame delivered downstream.
    pub fn record_sent_frame(&self) {
        self.sent_frames.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one failed send attempt on any channel.
    pub fn record_failed_send(&self) {
        self.failed_to_send.fetch_add(1, Ordering::Relaxed);
    }

    /// Generated event count.
    #[must_use]
    pub fn generated(&self) -> u64 {
        self.generated.load(Ordering::Relaxed)
    }

    /// Delivered structured event count.
    #[must_use]
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Delivered raw frame count.
    #[must_use]
    pub fn sent_frames(&self) -> u64 {
        self.sent_frames.load(Ordering::Relaxed)
    }

    /// Failed send attempt count.
    #[must_use]
    pub fn failed_to_send(&self) -> u64 {
        self.failed_to_send.load(Ordering::Relaxed)
    }

    /// Take a monitoring snapshot.
    #[must_use]
    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            generated: self.generated(),
            sent: self.sent(),
            sent_frames: self.sent_frames(),
            failed_to_send: self.failed_to_send(),
            last_generated_timestamp: self.last_generated_timestamp.load(Ordering::Relaxed),
            last_sent_timestamp: self.last_sent_timestamp.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`GeneratorCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CountersSnapshot {
    /// Events generated this run.
    pub generated: u64,
    /// Structured events delivered.
    pub sent: u64,
    /// Raw frames delivered.
    pub sent_frames: u64,
    /// Failed send attempts across both channels.
    pub failed_to_send: u64,
    /// Timestamp of the last generated event.
    pub last_generated_timestamp: u64,
    /// Timestamp of the last delivered structured event.
    pub last_sent_timestamp: u64,
}

/// Tick lateness metrics with ring buffer for percentile estimation.
#[derive(Debug, Clone)]
pub struct TickMetrics {
    /// Ring buffer of lateness samples in nanoseconds.
    samples: Box<[u64]>,
    /// Current write position in the ring buffer.
    write_pos: usize,
    /// Number of samples collected (saturates at buffer size).
    sample_count: usize,
    /// Total ticks fired.
    total_ticks: u64,
    /// Maximum observed lateness in nanoseconds.
    max_ns: u64,
    /// Sum of all lateness values for mean calculation.
    sum_ns: u64,
    /// Ticks that fired a full period or more behind schedule.
    catch_up_count: u64,
}

impl TickMetrics {
    /// Create a new metrics collector with the given histogram size.
    #[must_use]
    pub fn new(histogram_size: usize) -> Self {
        let size = histogram_size.max(1);
        Self {
            samples: vec![0u64; size].into_boxed_slice(),
            write_pos: 0,
            sample_count: 0,
            total_ticks: 0,
            max_ns: 0,
            sum_ns: 0,
            catch_up_count: 0,
        }
    }

    /// Record how late a tick fired and the period in force at the time.
    pub fn record(&mut self, lateness: Duration, period: Duration) {
        let ns = u64::try_from(lateness.as_nanos()).unwrap_or(u64::MAX);

        self.samples[self.write_pos] = ns;
        self.write_pos = (self.write_pos + 1) % self.samples.len();
        self.sample_count = self.sample_count.saturating_add(1).min(self.samples.len());

        self.total_ticks += 1;
        self.max_ns = self.max_ns.max(ns);
        self.sum_ns = self.sum_ns.wrapping_add(ns);

        if !period.is_zero() && lateness >= period {
            self.catch_up_count += 1;
        }
    }

    /// Total ticks recorded.
    #[must_use]
    pub fn total_ticks(&self) -> u64 {
        self.total_ticks
    }

    /// Ticks that fired at least one full period late.
    #[must_use]
    pub fn catch_up_count(&self) -> u64 {
        self.catch_up_count
    }

    /// Maximum observed lateness.
    #[must_use]
    pub fn max(&self) -> Option<Duration> {
        (self.total_ticks > 0).then(|| Duration::from_nanos(self.max_ns))
    }

    /// Mean lateness.
    #[must_use]
    pub fn mean(&self) -> Option<Duration> {
        (self.total_ticks > 0).then(|| Duration::from_nanos(self.sum_ns / self.total_ticks))
    }

    /// Compute a lateness percentile from the ring buffer.
    ///
    /// Returns `None` if no samples have been collected or if percentile is out of range.
    #[must_use]
    pub fn percentile(&self, percentile: f64) -> Option<Duration> {
        self.percentiles(&[percentile]).first().map(|&(_, d)| d)
    }

    /// Compute multiple percentiles; invalid percentiles are skipped.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn percentiles(&self, percentiles: &[f64]) -> Vec<(f64, Duration)> {
        if self.sample_count == 0 {
            return vec![];
        }

        let mut sorted: Vec<u64> = self.samples[..self.sample_count].to_vec();
        sorted.sort_unstable();

        percentiles
            .iter()
            .filter(|&&p| (0.0..=100.0).contains(&p))
            .map(|&p| {
                let idx = ((p / 100.0) * (sorted.len() - 1) as f64).round() as usize;
                let idx = idx.min(sorted.len() - 1);
                (p, Duration::from_nanos(sorted[idx]))
            })
            .collect()
    }

    /// Reset all metrics to initial state.
    pub fn reset(&mut self) {
        self.samples.fill(0);
        self.write_pos = 0;
        self.sample_count = 0;
        self.total_ticks = 0;
        self.max_ns = 0;
        self.sum_ns = 0;
        self.catch_up_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_record_and_snapshot() {
        let counters = GeneratorCounters::new();
        assert_eq!(counters.record_generated(100), 1);
        assert_eq!(counters.record_generated(200), 2);
        counters.record_sent(100);
        counters.record_sent_frame();
        counters.record_failed_send();
        counters.record_failed_send();

        let snap = counters.snapshot();
        assert_eq!(snap.generated, 2);
        assert_eq!(snap.sent, 1);
        assert_eq!(snap.sent_frames, 1);
        assert_eq!(snap.failed_to_send, 2);
        assert_eq!(snap.last_generated_timestamp, 200);
        assert_eq!(snap.last_sent_timestamp, 100);
    }

    #[test]
    fn test_counters_reset() {
        let counters = GeneratorCounters::new();
        counters.record_generated(5);
        counters.record_sent(5);
        counters.record_failed_send();

        counters.reset();
        assert_eq!(counters.snapshot(), CountersSnapshot::default());
    }

    #[test]
    fn test_counters_concurrent_increment() {
        let counters = std::sync::Arc::new(GeneratorCounters::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let c = std::sync::Arc::clone(&counters);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        c.record_failed_send();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(counters.failed_to_send(), 4000);
    }

    #[test]
    fn test_tick_metrics_basic() {
        let mut metrics = TickMetrics::new(100);
        let period = Duration::from_millis(1);

        metrics.record(Duration::from_micros(50), period);
        metrics.record(Duration::from_micros(150), period);
        metrics.record(Duration::from_micros(100), period);

        assert_eq!(metrics.total_ticks(), 3);
        assert_eq!(metrics.max(), Some(Duration::from_micros(150)));
        assert_eq!(metrics.mean(), Some(Duration::from_micros(100)));
        assert_eq!(metrics.catch_up_count(), 0);
    }

    #[test]
    fn test_tick_metrics_catch_up() {
        let mut metrics = TickMetrics::new(100);
        let period = Duration::from_millis(1);

        metrics.record(Duration::from_micros(900), period);
        metrics.record(Duration::from_micros(1000), period);
        metrics.record(Duration::from_millis(3), period);

        assert_eq!(metrics.catch_up_count(), 2);
    }

    #[test]
    fn test_tick_metrics_percentiles() {
        let mut metrics = TickMetrics::new(100);
        for i in 1..=100 {
            metrics.record(Duration::from_micros(i), Duration::from_millis(1));
        }

        let p50 = metrics.percentile(50.0).unwrap();
        assert!(p50.as_micros() >= 49 && p50.as_micros() <= 51);

        let results = metrics.percentiles(&[-10.0, 50.0, 150.0, 99.0, f64::NAN]);
        assert_eq!(results.len(), 2);
        assert!(metrics.percentile(f64::NAN).is_none());
    }

    #[test]
    fn test_tick_metrics_ring_wrap_and_reset() {
        let mut metrics = TickMetrics::new(10);
        for i in 0..25 {
            metrics.record(Duration::from_nanos(i * 1000), Duration::from_millis(1));
        }
        assert_eq!(metrics.total_ticks(), 25);

        metrics.reset();
        assert_eq!(metrics.total_ticks(), 0);
        assert!(metrics.max().is_none());
        assert!(metrics.percentile(50.0).is_none());
    }
}
