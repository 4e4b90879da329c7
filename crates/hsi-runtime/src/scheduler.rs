//! Drift-free rate scheduler for event generation.
//!
//! The scheduler runs one loop on a dedicated thread:
//! 1. Read the active rate
//! 2. Invoke the tick handler
//! 3. Advance the absolute deadline by one period
//! 4. Sleep towards the deadline in bounded slices, checking for cancellation
//!
//! Deadlines are anchored to the arithmetic schedule, never to "now", so time
//! spent in the handler or in slice checks does not accumulate as drift. A
//! handler that overruns its period is followed by back-to-back ticks until
//! the schedule is caught up.

use crate::timestamp::WaitOutcome;
use hsi_common::cancel::CancelToken;
use hsi_common::config::SchedulerConfig;
use hsi_common::error::{HsiError, HsiResult};
use hsi_common::metrics::TickMetrics;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Longest period the scheduler will wait between ticks.
pub const MAX_TICK_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

/// Active trigger rate, shared between the control path and the tick loop.
///
/// The rate is stored as the bit pattern of an `f64` in a single atomic, so
/// a reader never observes a partially written value.
#[derive(Debug)]
pub struct RateControl {
    bits: AtomicU64,
}

impl RateControl {
    /// Create a control holding `rate_hz`.
    #[must_use]
    pub fn new(rate_hz: f64) -> Self {
        Self {
            bits: AtomicU64::new(rate_hz.to_bits()),
        }
    }

    /// Replace the active rate. Picked up at the next tick boundary.
    pub fn set_rate(&self, rate_hz: f64) {
        self.bits.store(rate_hz.to_bits(), Ordering::Release);
    }

    /// Active rate in Hz.
    #[must_use]
    pub fn rate(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }

    /// Tick period for the active rate, or `None` while emission is suspended.
    #[must_use]
    pub fn period(&self) -> Option<Duration> {
        let rate = self.rate();
        if !(rate.is_finite() && rate > 0.0) {
            return None;
        }
        let period = Duration::try_from_secs_f64(1.0 / rate).unwrap_or(MAX_TICK_PERIOD);
        Some(period.min(MAX_TICK_PERIOD))
    }
}

/// Work performed on every scheduler tick.
pub trait TickHandler: Send + 'static {
    /// Called once on the scheduler thread before the first tick.
    ///
    /// Returning [`WaitOutcome::Interrupted`] ends the run without any ticks.
    fn prepare(&mut self, _cancel: &CancelToken) -> WaitOutcome {
        WaitOutcome::Ready
    }

    /// Called once per tick. May block, but should observe `cancel`.
    fn on_tick(&mut self, cancel: &CancelToken);
}

/// How the tick loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// Stopped after ticking.
    Stopped,
    /// The handler's preparation was interrupted; no tick ran.
    NotPrepared,
}

/// Summary returned by [`RateScheduler::stop`].
#[derive(Debug, Clone)]
pub struct SchedulerReport {
    /// How the loop ended.
    pub exit: LoopExit,
    /// Tick lateness metrics for the run.
    pub metrics: TickMetrics,
}

/// Owns the generation thread and its cancellation token.
#[derive(Debug)]
pub struct RateScheduler {
    rate: Arc<RateControl>,
    config: SchedulerConfig,
    histogram_size: usize,
    cancel: CancelToken,
    handle: Option<JoinHandle<SchedulerReport>>,
}

impl RateScheduler {
    /// Create a stopped scheduler driven by `rate`.
    #[must_use]
    pub fn new(rate: Arc<RateControl>, config: &SchedulerConfig, histogram_size: usize) -> Self {
        Self {
            rate,
            config: config.clone(),
            histogram_size,
            cancel: CancelToken::new(),
            handle: None,
        }
    }

    /// Whether a generation thread is active.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Spawn the generation thread running `handler`.
    ///
    /// # Errors
    ///
    /// Returns an error if already running or if the thread cannot be spawned.
    pub fn start<H: TickHandler>(&mut self, mut handler: H) -> HsiResult<()> {
        if self.handle.is_some() {
            return Err(HsiError::Thread("scheduler already running".into()));
        }

        // Each run gets a fresh token; a stopped token stays cancelled.
        self.cancel = CancelToken::new();
        let cancel = self.cancel.clone();
        let rate = Arc::clone(&self.rate);
        let config = self.config.clone();
        let mut metrics = TickMetrics::new(self.histogram_size);

        info!(rate_hz = rate.rate(), "Starting generation thread");

        let handle = thread::Builder::new()
            .name("hsi-gen".into())
            .spawn(move || {
                if handler.prepare(&cancel) == WaitOutcome::Interrupted {
                    return SchedulerReport {
                        exit: LoopExit::NotPrepared,
                        metrics,
                    };
                }
                run_loop(&mut handler, &rate, &config, &cancel, &mut metrics);
                SchedulerReport {
                    exit: LoopExit::Stopped,
                    metrics,
                }
            })
            .map_err(|e| HsiError::Thread(format!("failed to spawn generation thread: {e}")))?;

        self.handle = Some(handle);
        Ok(())
    }

    /// Cancel the loop and wait for the generation thread to exit.
    ///
    /// Returns `None` if the scheduler was not running. No tick runs after
    /// this returns.
    ///
    /// # Errors
    ///
    /// Returns [`HsiError::Thread`] if the generation thread panicked.
    pub fn stop(&mut self) -> HsiResult<Option<SchedulerReport>> {
        let Some(handle) = self.handle.take() else {
            return Ok(None);
        };

        self.cancel.cancel();
        let report = handle
            .join()
            .map_err(|_| HsiError::Thread("generation thread panicked".into()))?;

        debug!(
            ticks = report.metrics.total_ticks(),
            catch_up = report.metrics.catch_up_count(),
            "Generation thread joined"
        );
        Ok(Some(report))
    }
}

impl Drop for RateScheduler {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Scheduler stop on drop failed: {e}");
        }
    }
}

/// The tick loop. Returns when `cancel` is observed.
fn run_loop<H: TickHandler>(
    handler: &mut H,
    rate: &RateControl,
    config: &SchedulerConfig,
    cancel: &CancelToken,
    metrics: &mut TickMetrics,
) {
    let mut next_deadline = Instant::now();

    while !cancel.is_cancelled() {
        let Some(period) = rate.period() else {
            // Suspended: poll the rate without ticking, then restart the
            // schedule from "now" so resuming does not burst.
            if !cancel.sleep_for(config.idle_poll, config.slice) {
                break;
            }
            next_deadline = Instant::now();
            continue;
        };

        let lateness = Instant::now().saturating_duration_since(next_deadline);
        metrics.record(lateness, period);

        handler.on_tick(cancel);

        next_deadline += period;
        if !cancel.sleep_until(next_deadline, config.slice) {
            break;
        }
    }
}
