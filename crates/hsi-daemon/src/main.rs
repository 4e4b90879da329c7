//! HSI emulator daemon entry point.
//!
//! Runs the fake HSI event generator in-process together with a simulated
//! timing master and a data handler, with signal handling and periodic
//! diagnostics.

mod consumer;
mod diagnostics;
mod signals;
mod timing_master;

use anyhow::{Context, Result};
use clap::Parser;
use hsi_common::config::HsiConfig;
use hsi_dataformats::{FrameBytes, HsiEvent, TimeSync};
use hsi_link::{ConnectionRegistry, TimeSyncReceiver};
use hsi_runtime::generator::{FakeHsiEventGenerator, StartParams};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::consumer::{ConsumerCounters, ConsumerReport, DataHandler};
use crate::diagnostics::{
    format_prometheus_metrics, ConsumerFigures, DiagnosticsCollector, DiagnosticsSnapshot,
};
use crate::signals::{wait_for_shutdown, SignalHandler};
use crate::timing_master::TimingMaster;

/// Module name used in logs and errors.
const MODULE_NAME: &str = "fakehsievent";

/// Main loop polling interval.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// HSI emulator daemon command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "hsi-daemon",
    about = "HSI emulator daemon - generates timestamped trigger events at a controlled rate",
    version,
    long_about = None
)]
struct Args {
    /// Path to an emulator configuration file (TOML).
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Run number to start.
    #[arg(long, short = 'r', default_value = "1")]
    run_number: u32,

    /// Trigger rate for this run in Hz (overrides the configured rate).
    #[arg(long, short = 't', value_name = "HZ")]
    trigger_rate: Option<f64>,

    /// Stop after this long (e.g. "30s"); runs until signalled otherwise.
    #[arg(long, short = 'd', value_parser = humantime::parse_duration)]
    duration: Option<Duration>,

    /// Change the trigger rate this long after start.
    #[arg(long, value_parser = humantime::parse_duration, requires = "change_rate")]
    change_rate_after: Option<Duration>,

    /// New trigger rate in Hz applied by `--change-rate-after`.
    #[arg(long, value_name = "HZ", requires = "change_rate_after")]
    change_rate: Option<f64>,

    /// Seed for reproducible signal emulation.
    #[arg(long)]
    seed: Option<u64>,

    /// Print the final report in Prometheus text format.
    #[arg(long)]
    prometheus: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, short = 'l', default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting HSI emulator daemon");

    let mut config = load_config(&args)?;
    apply_overrides(&mut config, &args);
    config.validate().context("Invalid configuration")?;

    info!(
        trigger_rate_hz = config.generator.trigger_rate_hz,
        mode = %config.generator.signal_emulation_mode,
        hsievent = %config.connections.hsievent,
        raw_data = %config.connections.raw_data,
        "Configuration loaded"
    );

    let signal_handler = SignalHandler::new().context("Failed to set up signal handlers")?;

    run_daemon(&config, &args, &signal_handler)
}

/// Initialize logging with the specified log level.
fn init_logging(level: &str) {
    let filter = format!(
        "hsi_daemon={level},hsi_runtime={level},hsi_link={level},hsi_common={level}"
    );

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter)),
        )
        .with_target(true)
        .with_thread_names(true)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Resolution priority (first existing file wins):
/// 1. Command-line `--config` argument
/// 2. `HSI_CONFIG_PATH` environment variable
/// 3. `/etc/hsi/config.toml` (system path)
/// 4. `config/default.toml` (local development)
/// 5. Built-in defaults
fn load_config(args: &Args) -> Result<HsiConfig> {
    if let Some(config_path) = &args.config {
        info!(?config_path, "Loading config from command-line argument");
        return HsiConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {config_path:?}"));
    }

    if let Ok(env_path) = std::env::var("HSI_CONFIG_PATH") {
        let config_path = PathBuf::from(&env_path);
        if config_path.exists() {
            info!(?config_path, "Loading config from HSI_CONFIG_PATH");
            return HsiConfig::from_file(&config_path).with_context(|| {
                format!("Failed to load config from HSI_CONFIG_PATH={env_path:?}")
            });
        }
        warn!(
            path = %env_path,
            "HSI_CONFIG_PATH set but file does not exist, checking other locations"
        );
    }

    for path in ["/etc/hsi/config.toml", "config/default.toml"] {
        let config_path = PathBuf::from(path);
        if config_path.exists() {
            info!(?config_path, "Loading config file");
            return HsiConfig::from_file(&config_path)
                .with_context(|| format!("Failed to load config from {config_path:?}"));
        }
    }

    info!("No config file found, using built-in defaults");
    Ok(HsiConfig::default())
}

/// Apply command-line settings that live in the configuration.
fn apply_overrides(config: &mut HsiConfig, args: &Args) {
    if let Some(seed) = args.seed {
        config.generator.random_seed = Some(seed);
    }
    if args.prometheus {
        config.metrics.prometheus_export = true;
    }
}

/// Wire the generator, timing master and data handler, and run until stopped.
fn run_daemon(config: &HsiConfig, args: &Args, signal_handler: &SignalHandler) -> Result<()> {
    let connections = &config.connections;
    let registry = Arc::new(ConnectionRegistry::new());
    registry.declare::<HsiEvent>(&connections.hsievent, connections.queue_capacity);
    registry.declare::<FrameBytes>(&connections.raw_data, connections.queue_capacity);
    registry.declare::<TimeSync>(&connections.timesync, connections.queue_capacity);

    let mut data_handler = DataHandler::start(
        registry.receiver::<HsiEvent>(&connections.hsievent)?,
        registry.receiver::<FrameBytes>(&connections.raw_data)?,
    )
    .context("Failed to start data handler")?;

    let timesync = TimeSyncReceiver::new(registry.receiver::<TimeSync>(&connections.timesync)?);
    let mut generator = FakeHsiEventGenerator::new(MODULE_NAME, Arc::clone(&registry), timesync);
    generator
        .configure(config.clone())
        .context("Failed to configure generator")?;

    let mut timing_master = if config.timing.enabled {
        Some(
            TimingMaster::start(
                registry.sender::<TimeSync>(&connections.timesync)?,
                args.run_number,
                config.generator.clock_frequency_hz,
                config.timing.timesync_interval,
            )
            .context("Failed to start timing master")?,
        )
    } else {
        warn!("Timing master disabled; no events are emitted until an external time-sync arrives");
        None
    };

    generator
        .start(StartParams {
            run_number: args.run_number,
            trigger_rate: args.trigger_rate,
        })
        .context("Failed to start run")?;

    let diagnostics = DiagnosticsCollector::new();
    let started = Instant::now();
    let report_interval = config.metrics.report_interval;
    let mut next_report = started + report_interval;
    let mut pending_rate_change = args.change_rate_after.zip(args.change_rate);

    loop {
        if wait_for_shutdown(signal_handler, POLL_INTERVAL) {
            info!("Shutdown signal received, stopping run");
            break;
        }

        let elapsed = started.elapsed();
        if args.duration.is_some_and(|duration| elapsed >= duration) {
            info!(elapsed_ms = elapsed.as_millis(), "Run duration reached");
            break;
        }

        if let Some((after, rate_hz)) = pending_rate_change {
            if elapsed >= after {
                generator
                    .change_rate(rate_hz)
                    .context("Failed to change trigger rate")?;
                pending_rate_change = None;
            }
        }

        let periodic_due = !report_interval.is_zero() && Instant::now() >= next_report;
        if signal_handler.take_report_request() || periodic_due {
            let snapshot = diagnostics.snapshot(
                &generator.info(),
                live_consumer_figures(data_handler.counters()),
                None,
            );
            log_status(&snapshot);
            next_report = Instant::now() + report_interval;
        }
    }

    info!("Shutting down...");

    generator.stop().context("Failed to stop run")?;
    let published = timing_master.as_mut().map_or(0, TimingMaster::stop);
    let consumer_report = data_handler.stop();
    let figures = final_consumer_figures(consumer_report.as_ref(), data_handler.counters());

    let info = generator.info();
    let snapshot = diagnostics.snapshot(&info, figures, generator.last_tick_metrics());
    log_status(&snapshot);

    if let Some(ticks) = generator.last_tick_metrics() {
        for (percentile, lateness) in ticks.percentiles(&config.metrics.percentiles) {
            debug!(percentile, lateness_us = lateness.as_micros(), "Tick lateness percentile");
        }
    }

    if config.metrics.prometheus_export {
        println!("{}", format_prometheus_metrics(&snapshot));
    }

    let summary = serde_json::to_string(&info).context("Failed to serialize run summary")?;
    info!(
        summary = %summary,
        timesync_published = published,
        sequence_gaps = ?consumer_report.map(|r| r.sequence_gaps),
        signals = signal_handler.state().signal_count(),
        uptime_secs = snapshot.uptime.as_secs(),
        "Daemon shutdown complete"
    );

    generator.scrap().context("Failed to release configuration")?;
    Ok(())
}

fn consumer_figures(report: &ConsumerReport) -> ConsumerFigures {
    ConsumerFigures {
        events: report.events,
        frames: report.frames.processed,
        integrity_errors: report.sequence_gaps
            + report.frames.decode_errors
            + report.frames.backwards_timestamps
            + report.frames.zero_timestamps,
    }
}

fn live_consumer_figures(counters: &ConsumerCounters) -> ConsumerFigures {
    ConsumerFigures {
        events: counters.events(),
        frames: counters.frames(),
        integrity_errors: counters.integrity_errors(),
    }
}

/// Figures for the shutdown report. Falls back to the live counters when the
/// data handler could not return its statistics.
fn final_consumer_figures(
    report: Option<&ConsumerReport>,
    live: &ConsumerCounters,
) -> ConsumerFigures {
    if let Some(report) = report {
        return consumer_figures(report);
    }
    warn!(
        events = live.events(),
        frames = live.frames(),
        "Data handler report unavailable, using live consumer counters"
    );
    live_consumer_figures(live)
}

fn log_status(snapshot: &DiagnosticsSnapshot) {
    info!(
        health = %snapshot.health,
        state = %snapshot.state,
        run_number = ?snapshot.run_number,
        rate_hz = snapshot.active_rate_hz,
        generated = snapshot.counters.generated,
        sent = snapshot.counters.sent,
        sent_frames = snapshot.counters.sent_frames,
        failed_to_send = snapshot.counters.failed_to_send,
        timesync = snapshot.received_timesync,
        consumed_events = snapshot.consumed_events,
        consumed_frames = snapshot.consumed_frames,
        integrity_errors = snapshot.integrity_errors,
        max_lateness_us = ?snapshot.tick_lateness_max.map(|d| d.as_micros()),
        "Status"
    );
}
