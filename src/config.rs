//! Configuration module for latmon.
//!
//! Defaults can be overridden from environment variables and then from the
//! command line; the merged result is validated once before any prober
//! starts.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const SECS_PER_DAY: u64 = 86_400;

/// Configuration errors.
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("invalid value for {var}: '{value}'")]
    InvalidValue { var: String, value: String },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("batch size {batch_size} is not smaller than the samples per day ({per_day})")]
    BatchTooLarge { batch_size: usize, per_day: u64 },
}

/// When a full batch is handed off for persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushTrigger {
    /// As soon as the primary buffer reaches capacity.
    #[default]
    OnFull,
    /// When the next sample arrives at a full primary buffer.
    OnNextAppend,
}

impl FromStr for FlushTrigger {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "on-full" | "full" => Ok(FlushTrigger::OnFull),
            "on-next-append" | "next-append" => Ok(FlushTrigger::OnNextAppend),
            _ => Err(invalid("flush trigger", s)),
        }
    }
}

/// Monitor configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    /// Time between probe attempts (default: 2s)
    pub interval: Duration,
    /// Deadline for each network phase (default: 2s)
    pub timeout: Duration,
    /// Samples per persisted batch (default: 3600)
    pub batch_size: usize,
    /// Root directory for CSV and chart artifacts (default: ".")
    pub output_dir: PathBuf,
    /// Consecutive failures tolerated before a target is unreachable (default: 3)
    pub max_failures: u32,
    pub flush_trigger: FlushTrigger,
    /// Persist partial batches on shutdown (default: true)
    pub flush_on_stop: bool,
    /// How long shutdown waits for in-flight flushes (default: 5s)
    pub shutdown_grace: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            timeout: Duration::from_secs(2),
            batch_size: 3600,
            output_dir: PathBuf::from("."),
            max_failures: 3,
            flush_trigger: FlushTrigger::OnFull,
            flush_on_stop: true,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl MonitorConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `LATMON_INTERVAL`: seconds between probes
    /// - `LATMON_TIMEOUT`: per-phase timeout in seconds
    /// - `LATMON_BATCH_SIZE`: samples per batch
    /// - `LATMON_OUTPUT_DIR`: artifact root directory
    /// - `LATMON_FLUSH_TRIGGER`: `on-full` or `on-next-append`
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(|var| env::var(var).ok())
    }

    fn load_from(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        if let Some(v) = lookup("LATMON_INTERVAL") {
            cfg.interval = parse_secs("LATMON_INTERVAL", &v)?;
        }
        if let Some(v) = lookup("LATMON_TIMEOUT") {
            cfg.timeout = parse_secs("LATMON_TIMEOUT", &v)?;
        }
        if let Some(v) = lookup("LATMON_BATCH_SIZE") {
            cfg.batch_size = v.trim().parse().map_err(|_| invalid("LATMON_BATCH_SIZE", &v))?;
        }
        if let Some(v) = lookup("LATMON_OUTPUT_DIR") {
            cfg.output_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("LATMON_FLUSH_TRIGGER") {
            cfg.flush_trigger = v.parse().map_err(|_| invalid("LATMON_FLUSH_TRIGGER", &v))?;
        }

        Ok(cfg)
    }

    /// Number of probes one target makes per day at the configured interval.
    pub fn samples_per_day(&self) -> u64 {
        match self.interval.as_nanos() {
            0 => u64::MAX,
            n => (u128::from(SECS_PER_DAY) * 1_000_000_000 / n) as u64,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval.is_zero() {
            return Err(ConfigError::Zero("interval"));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::Zero("timeout"));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Zero("batch size"));
        }
        if self.max_failures == 0 {
            return Err(ConfigError::Zero("max failures"));
        }

        let per_day = self.samples_per_day();
        if self.batch_size as u64 >= per_day {
            return Err(ConfigError::BatchTooLarge {
                batch_size: self.batch_size,
                per_day,
            });
        }
        Ok(())
    }
}

/// Parse a non-negative number of seconds, fractions allowed.
pub fn parse_secs(var: &str, value: &str) -> Result<Duration, ConfigError> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .and_then(|s| Duration::try_from_secs_f64(s).ok())
        .ok_or_else(|| invalid(var, value))
}

fn invalid(var: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        var: var.to_string(),
        value: value.to_string(),
    }
}
