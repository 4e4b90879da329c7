//! Diagnostics and health reporting for the emulator daemon.
//!
//! Combines generator counters, tick timing and data handler statistics
//! into a snapshot that is logged periodically and can be rendered in the
//! Prometheus text exposition format.

use hsi_common::metrics::{CountersSnapshot, TickMetrics};
use hsi_common::state::ModuleState;
use hsi_runtime::generator::GeneratorInfo;
use std::time::{Duration, Instant};

/// Fraction of failed send attempts above which the emulator is degraded.
const DEGRADED_FAILURE_RATIO: f64 = 0.01;

/// Health of the emulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Emitting normally.
    Healthy,
    /// Emitting, but downstream is pushing back or data looks wrong.
    Degraded,
    /// Not yet running.
    Starting,
    /// Run ended.
    Stopped,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Starting => write!(f, "starting"),
            HealthStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// Point-in-time diagnostics.
#[derive(Debug, Clone)]
pub struct DiagnosticsSnapshot {
    pub health: HealthStatus,
    pub state: ModuleState,
    pub run_number: Option<u32>,
    pub active_rate_hz: f64,
    pub counters: CountersSnapshot,
    pub received_timesync: u64,
    pub consumed_events: u64,
    pub consumed_frames: u64,
    pub integrity_errors: u64,
    pub uptime: Duration,
    pub tick_lateness_mean: Option<Duration>,
    pub tick_lateness_max: Option<Duration>,
    pub catch_up_ticks: u64,
}

/// Data handler figures folded into a snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerFigures {
    pub events: u64,
    pub frames: u64,
    pub integrity_errors: u64,
}

/// Builds snapshots relative to daemon start.
#[derive(Debug)]
pub struct DiagnosticsCollector {
    start_time: Instant,
}

impl Default for DiagnosticsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagnosticsCollector {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
        }
    }

    /// Health derived from the module state and delivery figures.
    pub fn health(
        state: ModuleState,
        counters: &CountersSnapshot,
        integrity_errors: u64,
    ) -> HealthStatus {
        match state {
            ModuleState::Initial | ModuleState::Configured => HealthStatus::Starting,
            ModuleState::Stopped => HealthStatus::Stopped,
            ModuleState::Running => {
                let attempts = counters.sent + counters.sent_frames + counters.failed_to_send;
                #[allow(clippy::cast_precision_loss)]
                let failure_ratio = if attempts > 0 {
                    counters.failed_to_send as f64 / attempts as f64
                } else {
                    0.0
                };

                if failure_ratio > DEGRADED_FAILURE_RATIO || integrity_errors > 0 {
                    HealthStatus::Degraded
                } else {
                    HealthStatus::Healthy
                }
            }
        }
    }

    pub fn snapshot(
        &self,
        info: &GeneratorInfo,
        consumer: ConsumerFigures,
        ticks: Option<&TickMetrics>,
    ) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            health: Self::health(info.state, &info.counters, consumer.integrity_errors),
            state: info.state,
            run_number: info.run_number,
            active_rate_hz: info.active_rate_hz,
            counters: info.counters,
            received_timesync: info.received_timesync,
            consumed_events: consumer.events,
            consumed_frames: consumer.frames,
            integrity_errors: consumer.integrity_errors,
            uptime: self.start_time.elapsed(),
            tick_lateness_mean: ticks.and_then(TickMetrics::mean),
            tick_lateness_max: ticks.and_then(TickMetrics::max),
            catch_up_ticks: ticks.map_or(0, TickMetrics::catch_up_count),
        }
    }
}

/// Render a snapshot in the Prometheus text exposition format.
pub fn format_prometheus_metrics(snapshot: &DiagnosticsSnapshot) -> String {
    let mut output = String::new();

    let mut metric = |name: &str, kind: &str, help: &str, value: String| {
        output.push_str(&format!("# HELP {name} {help}\n"));
        output.push_str(&format!("# TYPE {name} {kind}\n"));
        output.push_str(&format!("{name} {value}\n"));
    };

    metric(
        "hsi_health",
        "gauge",
        "Emulator health (1=healthy, 0=not healthy)",
        format!(
            "{{status=\"{}\"}} {}",
            snapshot.health,
            u8::from(snapshot.health == HealthStatus::Healthy)
        ),
    );
    metric(
        "hsi_state",
        "gauge",
        "Current module state",
        format!("{{state=\"{}\"}} 1", snapshot.state),
    );
    metric(
        "hsi_trigger_rate_hz",
        "gauge",
        "Active trigger rate",
        format!("{}", snapshot.active_rate_hz),
    );
    metric(
        "hsi_events_generated_total",
        "counter",
        "HSI events generated this run",
        snapshot.counters.generated.to_string(),
    );
    metric(
        "hsi_events_sent_total",
        "counter",
        "Structured HSI events delivered",
        snapshot.counters.sent.to_string(),
    );
    metric(
        "hsi_frames_sent_total",
        "counter",
        "Raw HSI frames delivered",
        snapshot.counters.sent_frames.to_string(),
    );
    metric(
        "hsi_send_failures_total",
        "counter",
        "Failed send attempts across both connections",
        snapshot.counters.failed_to_send.to_string(),
    );
    metric(
        "hsi_last_sent_timestamp",
        "gauge",
        "DAQ timestamp of the last delivered event",
        snapshot.counters.last_sent_timestamp.to_string(),
    );
    metric(
        "hsi_timesync_received_total",
        "counter",
        "Time-sync samples received this run",
        snapshot.received_timesync.to_string(),
    );
    metric(
        "hsi_frames_consumed_total",
        "counter",
        "Raw frames decoded by the data handler",
        snapshot.consumed_frames.to_string(),
    );
    metric(
        "hsi_integrity_errors_total",
        "counter",
        "Data integrity violations seen by the data handler",
        snapshot.integrity_errors.to_string(),
    );
    metric(
        "hsi_uptime_seconds",
        "gauge",
        "Daemon uptime in seconds",
        format!("{:.3}", snapshot.uptime.as_secs_f64()),
    );

    if let Some(mean) = snapshot.tick_lateness_mean {
        metric(
            "hsi_tick_lateness_avg_seconds",
            "gauge",
            "Average tick lateness",
            format!("{:.9}", mean.as_secs_f64()),
        );
    }
    if let Some(max) = snapshot.tick_lateness_max {
        metric(
            "hsi_tick_lateness_max_seconds",
            "gauge",
            "Maximum tick lateness",
            format!("{:.9}", max.as_secs_f64()),
        );
    }
    metric(
        "hsi_catch_up_ticks_total",
        "counter",
        "Ticks that started more than one period late",
        snapshot.catch_up_ticks.to_string(),
    );

    output
}
