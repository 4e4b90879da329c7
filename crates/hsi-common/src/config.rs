//! Configuration structures for the HSI emulator.
//!
//! Supports TOML deserialization with sensible defaults for
//! development and explicit values for production deployment.

use crate::error::{HsiError, HsiResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level emulator configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HsiConfig {
    /// Event generation parameters.
    pub generator: GeneratorConfig,

    /// Outbound connection endpoints.
    pub connections: ConnectionsConfig,

    /// Sender readiness budget applied at start.
    pub startup: StartupConfig,

    /// Tick loop timing parameters.
    pub scheduler: SchedulerConfig,

    /// Simulated timing master (daemon only).
    pub timing: TimingConfig,

    /// Metrics and diagnostics configuration.
    pub metrics: MetricsConfig,
}

/// Statistical policy used to emulate active signal lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SignalEmulationMode {
    /// Every line active on every tick.
    #[default]
    AllOnes,
    /// Each line independently active when a Poisson draw is non-zero.
    PoissonPerBit,
    /// One uniformly distributed 32-bit draw per tick.
    UniformRandom,
}

impl std::fmt::Display for SignalEmulationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AllOnes => write!(f, "all_ones"),
            Self::PoissonPerBit => write!(f, "poisson_per_bit"),
            Self::UniformRandom => write!(f, "uniform_random"),
        }
    }
}

/// Event generation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Frequency of the global DAQ clock in Hz.
    pub clock_frequency_hz: u64,

    /// Base trigger rate in Hz. Must be greater than zero.
    pub trigger_rate_hz: f64,

    /// Offset in clock ticks added to every generated timestamp.
    pub timestamp_offset: i64,

    /// Device identifier written into every structured event.
    pub hsi_device_id: u32,

    /// Signal emulation policy.
    pub signal_emulation_mode: SignalEmulationMode,

    /// Poisson mean per signal line (only used in `poisson_per_bit` mode).
    pub mean_signal_multiplicity: f64,

    /// Mask of signal lines allowed to produce a trigger.
    pub enabled_signals: u32,

    /// Seed for the signal emulation PRNG. Entropy-seeded when absent.
    pub random_seed: Option<u64>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            clock_frequency_hz: 62_500_000,
            trigger_rate_hz: 1.0,
            timestamp_offset: 0,
            hsi_device_id: 0,
            signal_emulation_mode: SignalEmulationMode::AllOnes,
            mean_signal_multiplicity: 0.0,
            enabled_signals: u32::MAX,
            random_seed: None,
        }
    }
}

impl GeneratorConfig {
    /// Event period in microseconds for a given rate.
    ///
    /// Returns `None` for a rate of zero (emission suspended) or any
    /// rate that is negative or not finite.
    #[must_use]
    pub fn period_us(rate_hz: f64) -> Option<f64> {
        if rate_hz.is_finite() && rate_hz > 0.0 {
            Some(1.0e6 / rate_hz)
        } else {
            None
        }
    }

    /// Validate generator parameters.
    ///
    /// # Errors
    ///
    /// Returns an error for a non-positive rate, a zero clock frequency,
    /// or a negative Poisson mean.
    pub fn validate(&self) -> HsiResult<()> {
        validate_positive_rate(self.trigger_rate_hz)?;

        if self.clock_frequency_hz == 0 {
            return Err(HsiError::Config(
                "clock_frequency_hz must be greater than zero".into(),
            ));
        }

        if !self.mean_signal_multiplicity.is_finite() || self.mean_signal_multiplicity < 0.0 {
            return Err(HsiError::Config(format!(
                "mean_signal_multiplicity must be a finite value >= 0, got {}",
                self.mean_signal_multiplicity
            )));
        }

        Ok(())
    }
}

/// Check that a rate is finite and strictly positive.
///
/// # Errors
///
/// Returns [`HsiError::InvalidTriggerRate`] otherwise.
pub fn validate_positive_rate(rate_hz: f64) -> HsiResult<()> {
    if rate_hz.is_finite() && rate_hz > 0.0 {
        Ok(())
    } else {
        Err(HsiError::InvalidTriggerRate(rate_hz))
    }
}

/// Outbound connection endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionsConfig {
    /// Connection carrying structured HSI events.
    pub hsievent: String,

    /// Connection carrying raw 28-byte HSI frames.
    pub raw_data: String,

    /// Connection delivering time-sync samples from the timing master.
    pub timesync: String,

    /// Capacity of each bounded in-process queue.
    pub queue_capacity: usize,

    /// Timeout applied to a single send attempt.
    #[serde(with = "humantime_serde")]
    pub send_timeout: Duration,
}

impl Default for ConnectionsConfig {
    fn default() -> Self {
        Self {
            hsievent: String::from("hsi_events"),
            raw_data: String::from("hsi_raw_data"),
            timesync: String::from("hsi_timesync"),
            queue_capacity: 1000,
            send_timeout: Duration::from_millis(1),
        }
    }
}

impl ConnectionsConfig {
    /// Validate endpoint names and queue parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if an endpoint name is empty or the queue has no capacity.
    pub fn validate(&self) -> HsiResult<()> {
        if self.hsievent.trim().is_empty() {
            return Err(HsiError::Config("hsievent connection name is empty".into()));
        }
        if self.raw_data.trim().is_empty() {
            return Err(HsiError::Config("raw_data connection name is empty".into()));
        }
        if self.timesync.trim().is_empty() {
            return Err(HsiError::Config("timesync connection name is empty".into()));
        }
        if self.hsievent == self.raw_data {
            return Err(HsiError::Config(format!(
                "hsievent and raw_data must be distinct connections, both are \"{}\"",
                self.hsievent
            )));
        }
        if self.queue_capacity == 0 {
            return Err(HsiError::Config("queue_capacity must be at least 1".into()));
        }
        Ok(())
    }
}

/// Sender readiness budget applied before the generation thread starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StartupConfig {
    /// Initial quick readiness probe.
    #[serde(with = "humantime_serde")]
    pub initial_probe: Duration,

    /// Number of additional readiness attempts after the probe fails.
    pub ready_attempts: u32,

    /// Wait applied to each readiness attempt.
    #[serde(with = "humantime_serde")]
    pub ready_wait: Duration,
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            initial_probe: Duration::from_millis(1),
            ready_attempts: 10,
            ready_wait: Duration::from_secs(1),
        }
    }
}

/// Tick loop timing parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Longest single sleep between cancellation checks.
    #[serde(with = "humantime_serde")]
    pub slice: Duration,

    /// Re-poll interval while the active rate is zero.
    #[serde(with = "humantime_serde")]
    pub idle_poll: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            slice: Duration::from_millis(1),
            idle_poll: Duration::from_millis(250),
        }
    }
}

/// Simulated timing master configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Publish simulated time-sync samples in-process.
    pub enabled: bool,

    /// Interval between time-sync samples.
    #[serde(with = "humantime_serde")]
    pub timesync_interval: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timesync_interval: Duration::from_millis(100),
        }
    }
}

/// Metrics and diagnostics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Size of the tick lateness ring buffer.
    pub histogram_size: usize,

    /// Percentiles reported for tick lateness.
    pub percentiles: Vec<f64>,

    /// Interval between periodic counter reports.
    #[serde(with = "humantime_serde")]
    pub report_interval: Duration,

    /// Render the final report in Prometheus text format.
    pub prometheus_export: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            histogram_size: 10_000,
            percentiles: vec![50.0, 90.0, 99.0, 99.9],
            report_interval: Duration::from_secs(10),
            prometheus_export: false,
        }
    }
}

impl HsiConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }

    /// Serialize configuration to TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Validate every section that affects a run.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure found.
    pub fn validate(&self) -> HsiResult<()> {
        self.generator.validate()?;
        self.connections.validate()?;
        if self.scheduler.slice.is_zero() {
            return Err(HsiError::Config("scheduler.slice must be non-zero".into()));
        }
        Ok(())
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Serde helper module for `Duration` using humantime format.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
