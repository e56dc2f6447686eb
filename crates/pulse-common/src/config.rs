//! Configuration structures for the pulse generator.
//!
//! Supports TOML deserialization with defaults matching a 60 Hz strobe on
//! line 23, and resolution of the user-facing pulse counts into the tick
//! moduli the pattern engine runs on.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Default full output period: 16682 us (about 59.94 Hz).
pub const DEFAULT_PERIOD: Duration = Duration::from_micros(16_682);

/// Default output line offset.
pub const DEFAULT_PIN: u32 = 23;

/// Latest accepted `start_epoch`: deadlines must fit in signed 64-bit nanoseconds.
pub const MAX_START_EPOCH: u64 = i64::MAX.unsigned_abs() / 1_000_000_000;

/// Top-level configuration record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PulseConfig {
    /// Nominal full output period.
    #[serde(with = "humantime_serde")]
    pub period: Duration,

    /// Output line offset on the chip.
    pub pin: u32,

    /// GPIO character device path.
    pub chip: PathBuf,

    /// Consumer label attached to the claimed line.
    pub consumer: String,

    /// Which output driver to use.
    pub output: OutputDriver,

    /// Absolute start instant in Unix seconds; 0 starts immediately.
    pub start_epoch: u64,

    /// Delay before the first tick in relative start mode.
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,

    /// Capacity of the tick channel between timer and engine.
    pub channel_capacity: usize,

    /// Skip/insert pattern.
    pub pattern: PatternConfig,

    /// Real-time scheduling configuration.
    pub realtime: RealtimeConfig,

    /// Jitter measurement configuration.
    pub diagnostics: DiagnosticsConfig,
}

impl Default for PulseConfig {
    fn default() -> Self {
        Self {
            period: DEFAULT_PERIOD,
            pin: DEFAULT_PIN,
            chip: PathBuf::from("/dev/gpiochip0"),
            consumer: String::from("pulse-train"),
            output: OutputDriver::default(),
            start_epoch: 0,
            initial_delay: Duration::from_micros(1),
            channel_capacity: 64,
            pattern: PatternConfig::default(),
            realtime: RealtimeConfig::default(),
            diagnostics: DiagnosticsConfig::default(),
        }
    }
}

/// Output driver selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputDriver {
    /// GPIO character device line.
    #[default]
    Gpio,
    /// In-memory output for testing without hardware.
    Simulated,
}

/// User-facing pattern options, counted in output pulses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    /// Start a skip episode every N output pulses (`None` or 0 disables).
    pub skip_every: Option<u32>,

    /// Number of pulses held constant per skip episode.
    pub skip_count: u32,

    /// Insert an extra pulse every N output pulses (`None` or 0 disables).
    ///
    /// Takes precedence over `skip_every` when both are set.
    pub insert_every: Option<u32>,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            skip_every: None,
            skip_count: 2,
            insert_every: None,
        }
    }
}

impl PatternConfig {
    /// Returns true when both skip and insert were requested.
    #[must_use]
    pub fn is_conflicting(&self) -> bool {
        enabled(self.skip_every).is_some() && enabled(self.insert_every).is_some()
    }

    /// Resolve the pulse counts into a tick-level pattern mode.
    ///
    /// Skip episodes trigger every `2 * skip_every + 1` ticks (odd, so
    /// consecutive episodes start on alternating levels) and last
    /// `2 * skip_count` ticks. Insert windows open every
    /// `4 * insert_every` ticks because insert mode ticks at twice the
    /// plain rate.
    #[must_use]
    pub fn mode(&self) -> PatternMode {
        if let Some(every) = enabled(self.insert_every) {
            return PatternMode::Insert {
                modulus: 4 * u64::from(every),
            };
        }
        if let Some(every) = enabled(self.skip_every) {
            return PatternMode::Skip {
                modulus: 2 * u64::from(every) + 1,
                length: 2 * u64::from(self.skip_count),
            };
        }
        PatternMode::Plain
    }
}

fn enabled(value: Option<u32>) -> Option<u32> {
    value.filter(|&n| n > 0)
}

/// Tick-level pattern, selected once at setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum PatternMode {
    /// Plain alternation.
    #[default]
    Plain,
    /// Hold the output for `length` ticks every `modulus` ticks.
    Skip {
        /// Ticks between episode triggers.
        modulus: u64,
        /// Episode length in ticks.
        length: u64,
    },
    /// Open a 4-tick insert window every `modulus` ticks.
    Insert {
        /// Ticks between window starts.
        modulus: u64,
    },
}

impl PatternMode {
    /// Ticks per full output period for this mode.
    #[must_use]
    pub fn ticks_per_period(&self) -> u32 {
        match self {
            Self::Insert { .. } => 4,
            Self::Plain | Self::Skip { .. } => 2,
        }
    }
}

/// Real-time scheduling configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Try to elevate scheduling (best-effort unless `fail_fast`).
    pub enabled: bool,

    /// Scheduler policy: "fifo", "rr" or "other".
    pub policy: SchedPolicy,

    /// Scheduler priority (1-99 for RT policies).
    pub priority: u8,

    /// Lock all memory pages (mlockall).
    pub lock_memory: bool,

    /// Fail at startup if RT requirements cannot be met.
    pub fail_fast: bool,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            policy: SchedPolicy::Fifo,
            priority: 80,
            lock_memory: true,
            fail_fast: false,
        }
    }
}

/// Scheduler policy for the tick threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SchedPolicy {
    /// SCHED_FIFO: First-in-first-out real-time.
    #[default]
    Fifo,
    /// SCHED_RR: Round-robin real-time.
    Rr,
    /// SCHED_OTHER: Normal time-sharing (non-RT).
    Other,
}

/// Jitter measurement configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Record tick timestamps instead of running the pattern.
    pub enabled: bool,

    /// Measurement window; sets the timestamp buffer capacity.
    #[serde(with = "humantime_serde")]
    pub duration: Duration,

    /// Number of leading intervals printed individually in the report.
    pub report_prefix: usize,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            duration: Duration::from_secs(10),
            report_prefix: 20,
        }
    }
}

impl PulseConfig {
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

    /// Check value ranges that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timer_interval().is_zero() {
            return Err(ConfigError::Invalid(format!(
                "period {:?} is too short to split into timer ticks",
                self.period
            )));
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "channel_capacity must be at least 1".into(),
            ));
        }
        if matches!(self.pattern.mode(), PatternMode::Skip { .. }) && self.pattern.skip_count == 0 {
            return Err(ConfigError::Invalid(
                "skip_count must be at least 1 when skip_every is set".into(),
            ));
        }
        if self.realtime.policy != SchedPolicy::Other && !(1..=99).contains(&self.realtime.priority)
        {
            return Err(ConfigError::Invalid(format!(
                "priority {} outside 1..=99",
                self.realtime.priority
            )));
        }
        if self.start_epoch > MAX_START_EPOCH {
            return Err(ConfigError::Invalid(format!(
                "start_epoch {} is beyond {MAX_START_EPOCH}",
                self.start_epoch
            )));
        }
        if self.diagnostics.enabled && self.diagnostics.duration.is_zero() {
            return Err(ConfigError::Invalid(
                "diagnostics duration must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// The effective pattern; diagnostics bypass pattern modulation.
    #[must_use]
    pub fn pattern_mode(&self) -> PatternMode {
        if self.diagnostics.enabled {
            PatternMode::Plain
        } else {
            self.pattern.mode()
        }
    }

    /// Timer firing interval: half the period, a quarter in insert mode.
    #[must_use]
    pub fn timer_interval(&self) -> Duration {
        self.period / self.pattern_mode().ticks_per_period()
    }

    /// Absolute first-tick instant, if one was configured.
    ///
    /// `None` also for an epoch the system clock cannot represent, which
    /// [`PulseConfig::validate`] rejects.
    #[must_use]
    pub fn start_at(&self) -> Option<SystemTime> {
        if self.start_epoch == 0 {
            return None;
        }
        UNIX_EPOCH.checked_add(Duration::from_secs(self.start_epoch))
    }

    /// Timestamp buffer capacity: tick rate times measurement window.
    #[must_use]
    pub fn diagnostic_capacity(&self) -> usize {
        let interval = self.timer_interval().as_nanos().max(1);
        let ticks = self.diagnostics.duration.as_nanos().div_ceil(interval);
        usize::try_from(ticks).unwrap_or(usize::MAX).max(1)
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

    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
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
