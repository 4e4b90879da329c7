//! Fake HSI event generator module.
//!
//! Emulates an HSI device: on every scheduler tick it draws a signal map,
//! masks it with the enabled signals and, if any line survives, emits one
//! timestamped event on the structured connection plus the matching raw
//! frame on the raw-data connection.
//!
//! The module follows the run-control lifecycle in [`ModuleState`]:
//! `configure` → `start` → (`change_rate`)* → `stop` → `start` | `scrap`.

use crate::dispatcher::{EventOutput, FrameOutput, HsiEventSender};
use crate::scheduler::{RateControl, RateScheduler, SchedulerReport, TickHandler};
use crate::signal_map::SignalMapGenerator;
use crate::timestamp::{TimestampSynchronizer, WaitOutcome};
use hsi_common::cancel::CancelToken;
use hsi_common::config::{validate_positive_rate, GeneratorConfig, HsiConfig};
use hsi_common::error::{HsiError, HsiResult};
use hsi_common::metrics::{CountersSnapshot, GeneratorCounters, TickMetrics};
use hsi_common::state::{ModuleState, StateMachine};
use hsi_common::time::apply_offset;
use hsi_dataformats::{FrameBytes, HsiEvent, HsiFrame};
use hsi_link::{ConnectionRegistry, TimeSyncReceiver};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, trace, warn};

/// Parameters of the `start` command.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StartParams {
    /// Run being started.
    pub run_number: u32,
    /// Replaces the configured trigger rate for this run when set.
    pub trigger_rate: Option<f64>,
}

/// Monitoring snapshot returned by [`FakeHsiEventGenerator::info`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratorInfo {
    /// Current module state.
    pub state: ModuleState,
    /// Run in progress or last run, if any.
    pub run_number: Option<u32>,
    /// Active trigger rate in Hz.
    pub active_rate_hz: f64,
    /// Time-sync samples received during the current run.
    pub received_timesync: u64,
    /// Event and delivery counters.
    pub counters: CountersSnapshot,
}

/// Everything `configure` derives from an [`HsiConfig`].
struct Configured {
    config: HsiConfig,
    /// Shared with each run's task so the PRNG keeps advancing across runs.
    signal_maps: Arc<Mutex<SignalMapGenerator>>,
    dispatcher: Arc<HsiEventSender>,
}

/// State owned by one run.
struct ActiveRun {
    run_number: u32,
    scheduler: RateScheduler,
    synchronizer: Arc<TimestampSynchronizer>,
}

/// Emulated HSI device driven by run-control commands.
pub struct FakeHsiEventGenerator {
    name: String,
    registry: Arc<ConnectionRegistry>,
    timesync: TimeSyncReceiver,
    state: StateMachine,
    rate: Arc<RateControl>,
    counters: Arc<GeneratorCounters>,
    configured: Option<Configured>,
    run: Option<ActiveRun>,
    last_run_number: Option<u32>,
    last_report: Option<SchedulerReport>,
}

impl std::fmt::Debug for FakeHsiEventGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeHsiEventGenerator")
            .field("name", &self.name)
            .field("state", &self.state.state())
            .field("rate_hz", &self.rate.rate())
            .field("run_number", &self.run.as_ref().map(|r| r.run_number))
            .finish_non_exhaustive()
    }
}

impl FakeHsiEventGenerator {
    /// Create an unconfigured module.
    ///
    /// Output connections are resolved from `registry` at configure time;
    /// `timesync` feeds the per-run timestamp estimator.
    pub fn new(name: &str, registry: Arc<ConnectionRegistry>, timesync: TimeSyncReceiver) -> Self {
        Self {
            name: name.to_string(),
            registry,
            timesync,
            state: StateMachine::new(),
            rate: Arc::new(RateControl::new(0.0)),
            counters: Arc::new(GeneratorCounters::new()),
            configured: None,
            run: None,
            last_run_number: None,
            last_report: None,
        }
    }

    /// Module name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ModuleState {
        self.state.state()
    }

    /// Shared counters, for monitoring threads.
    pub fn counters(&self) -> Arc<GeneratorCounters> {
        Arc::clone(&self.counters)
    }

    /// Active trigger rate in Hz.
    pub fn active_rate(&self) -> f64 {
        self.rate.rate()
    }

    /// Tick timing metrics of the last completed run.
    pub fn last_tick_metrics(&self) -> Option<&TickMetrics> {
        self.last_report.as_ref().map(|r| &r.metrics)
    }

    /// Validate and apply a configuration.
    ///
    /// # Errors
    ///
    /// Fails without changing state if the command is not allowed, the
    /// configuration is invalid, or an output connection cannot be resolved.
    pub fn configure(&mut self, config: HsiConfig) -> HsiResult<()> {
        self.state.check_command("configure", ModuleState::Configured)?;
        config.validate()?;

        let generator = &config.generator;
        let signal_maps = SignalMapGenerator::new(
            generator.signal_emulation_mode,
            generator.mean_signal_multiplicity,
            generator.random_seed,
        )?;

        let events: EventOutput =
            Box::new(self.registry.sender::<HsiEvent>(&config.connections.hsievent)?);
        let frames: FrameOutput =
            Box::new(self.registry.sender::<FrameBytes>(&config.connections.raw_data)?);
        let dispatcher = Arc::new(HsiEventSender::new(
            &self.name,
            events,
            frames,
            config.connections.send_timeout,
            Arc::clone(&self.counters),
        ));

        self.rate.set_rate(generator.trigger_rate_hz);

        info!(
            module = %self.name,
            clock_frequency_hz = generator.clock_frequency_hz,
            trigger_rate_hz = generator.trigger_rate_hz,
            event_period_us = ?GeneratorConfig::period_us(generator.trigger_rate_hz),
            timestamp_offset = generator.timestamp_offset,
            hsi_device_id = generator.hsi_device_id,
            mode = %generator.signal_emulation_mode,
            mean_signal_multiplicity = generator.mean_signal_multiplicity,
            enabled_signals = format_args!("{:#010x}", generator.enabled_signals),
            hsievent = %config.connections.hsievent,
            raw_data = %config.connections.raw_data,
            "Configured"
        );

        self.configured = Some(Configured {
            config,
            signal_maps: Arc::new(Mutex::new(signal_maps)),
            dispatcher,
        });
        self.state.transition(ModuleState::Configured)
    }

    /// Start a run.
    ///
    /// Subscribes a fresh timestamp estimator, waits for both outputs to be
    /// ready, then spawns the generation thread.
    ///
    /// # Errors
    ///
    /// Fails without changing state if the command is not allowed, the rate
    /// override is not positive, or an output is not ready in time.
    pub fn start(&mut self, params: StartParams) -> HsiResult<()> {
        self.state.check_command("start", ModuleState::Running)?;
        if let Some(rate) = params.trigger_rate {
            validate_positive_rate(rate)?;
        }
        let configured = self.configured.as_ref().ok_or_else(|| HsiError::InvalidCommand {
            command: "start".into(),
            state: self.state.state().to_string(),
        })?;
        let config = &configured.config;

        let synchronizer = Arc::new(TimestampSynchronizer::new(
            params.run_number,
            config.generator.clock_frequency_hz,
        ));
        self.timesync.add_callback(synchronizer.clone())?;

        if let Err(e) = configured.dispatcher.ready_to_send(&config.startup) {
            error!(module = %self.name, "{e}");
            self.timesync.remove_callback();
            return Err(e);
        }

        let base_rate = config.generator.trigger_rate_hz;
        let rate = params.trigger_rate.unwrap_or(base_rate);
        self.rate.set_rate(rate);
        self.counters.reset();

        let task = GenerationTask {
            module: self.name.clone(),
            run_number: params.run_number,
            device_id: config.generator.hsi_device_id,
            enabled_signals: config.generator.enabled_signals,
            timestamp_offset: config.generator.timestamp_offset,
            signal_maps: Arc::clone(&configured.signal_maps),
            synchronizer: Arc::clone(&synchronizer),
            dispatcher: Arc::clone(&configured.dispatcher),
            counters: Arc::clone(&self.counters),
        };

        let mut scheduler = RateScheduler::new(
            Arc::clone(&self.rate),
            &config.scheduler,
            config.metrics.histogram_size,
        );
        if let Err(e) = scheduler.start(task) {
            self.timesync.remove_callback();
            self.rate.set_rate(base_rate);
            return Err(e);
        }

        info!(
            module = %self.name,
            run_number = params.run_number,
            trigger_rate_hz = rate,
            event_period_us = ?GeneratorConfig::period_us(rate),
            "Started run"
        );

        self.run = Some(ActiveRun {
            run_number: params.run_number,
            scheduler,
            synchronizer,
        });
        self.last_run_number = Some(params.run_number);
        self.state.transition(ModuleState::Running)
    }

    /// Change the active trigger rate of the running run.
    ///
    /// A rate of zero suspends emission until the next change.
    ///
    /// # Errors
    ///
    /// Fails if not running or if `rate_hz` is negative or not finite.
    pub fn change_rate(&mut self, rate_hz: f64) -> HsiResult<()> {
        if !self.state.state().is_running() {
            return Err(HsiError::InvalidCommand {
                command: "change_rate".into(),
                state: self.state.state().to_string(),
            });
        }
        if !rate_hz.is_finite() || rate_hz < 0.0 {
            return Err(HsiError::InvalidTriggerRate(rate_hz));
        }

        self.rate.set_rate(rate_hz);
        info!(
            module = %self.name,
            trigger_rate_hz = rate_hz,
            event_period_us = ?GeneratorConfig::period_us(rate_hz),
            "Changed trigger rate"
        );
        Ok(())
    }

    /// Stop the running run and wait for the generation thread to exit.
    ///
    /// # Errors
    ///
    /// Fails if not running or if the generation thread panicked.
    pub fn stop(&mut self) -> HsiResult<()> {
        self.state.check_command("stop", ModuleState::Stopped)?;
        let Some(mut run) = self.run.take() else {
            return self.state.transition(ModuleState::Stopped);
        };

        let report = run.scheduler.stop();
        self.timesync.remove_callback();

        info!(
            module = %self.name,
            received = run.synchronizer.received_timesync_count(),
            "Time-sync messages received during run"
        );

        let counters = self.counters.snapshot();
        info!(
            module = %self.name,
            run_number = run.run_number,
            generated = counters.generated,
            sent = counters.sent,
            sent_frames = counters.sent_frames,
            failed_to_send = counters.failed_to_send,
            "Stopped run"
        );

        if let Some(base) = self.configured.as_ref().map(|c| c.config.generator.trigger_rate_hz) {
            self.rate.set_rate(base);
        }
        self.state.transition(ModuleState::Stopped)?;

        self.last_report = report?;
        if let Some(report) = &self.last_report {
            debug!(
                module = %self.name,
                ticks = report.metrics.total_ticks(),
                max_lateness_us = ?report.metrics.max().map(|d| d.as_micros()),
                catch_up = report.metrics.catch_up_count(),
                "Tick timing"
            );
        }
        Ok(())
    }

    /// Release the configuration.
    ///
    /// # Errors
    ///
    /// Fails if the module is running or was never configured.
    pub fn scrap(&mut self) -> HsiResult<()> {
        self.state.check_command("scrap", ModuleState::Initial)?;
        self.configured = None;
        self.rate.set_rate(0.0);
        info!(module = %self.name, "Scrapped");
        self.state.transition(ModuleState::Initial)
    }

    /// Monitoring snapshot.
    pub fn info(&self) -> GeneratorInfo {
        GeneratorInfo {
            state: self.state.state(),
            run_number: self.run.as_ref().map(|r| r.run_number).or(self.last_run_number),
            active_rate_hz: self.rate.rate(),
            received_timesync: self
                .run
                .as_ref()
                .map_or(0, |r| r.synchronizer.received_timesync_count()),
            counters: self.counters.snapshot(),
        }
    }
}

impl Drop for FakeHsiEventGenerator {
    fn drop(&mut self) {
        if self.state.state().is_running() {
            if let Err(e) = self.stop() {
                warn!(module = %self.name, "Stop on drop failed: {e}");
            }
        }
    }
}

/// Per-run work executed on the generation thread.
struct GenerationTask {
    module: String,
    run_number: u32,
    device_id: u32,
    enabled_signals: u32,
    timestamp_offset: i64,
    signal_maps: Arc<Mutex<SignalMapGenerator>>,
    synchronizer: Arc<TimestampSynchronizer>,
    dispatcher: Arc<HsiEventSender>,
    counters: Arc<GeneratorCounters>,
}

impl TickHandler for GenerationTask {
    fn prepare(&mut self, cancel: &CancelToken) -> WaitOutcome {
        if self.synchronizer.wait_for_valid(cancel) == WaitOutcome::Interrupted {
            error!(
                module = %self.module,
                run_number = self.run_number,
                "FailedToGetTimestampEstimate: stopped before a valid timestamp estimate was available"
            );
            return WaitOutcome::Interrupted;
        }

        debug!(module = %self.module, "Timestamp estimate valid, generating events");
        WaitOutcome::Ready
    }

    fn on_tick(&mut self, cancel: &CancelToken) {
        let signal_map = self.signal_maps.lock().unwrap_or_else(|e| e.into_inner()).generate();
        let trigger_map = signal_map & self.enabled_signals;
        trace!(
            raw = format_args!("{signal_map:032b}"),
            masked = format_args!("{trigger_map:032b}"),
            "Signal map"
        );

        if trigger_map == 0 {
            return;
        }

        let estimate = match self.synchronizer.current_estimate() {
            Ok(estimate) => estimate,
            Err(e) => {
                error!(module = %self.module, "{e}");
                return;
            }
        };
        let timestamp = apply_offset(estimate, self.timestamp_offset);
        let sequence = self.counters.record_generated(timestamp);

        let event =
            HsiEvent::new(self.device_id, trigger_map, timestamp, sequence, self.run_number);
        let frame = HsiFrame::new(timestamp, signal_map, trigger_map, sequence);
        self.dispatcher.send(event, &frame, cancel);
    }
}
