//! Command line interface.

use crate::config::{parse_secs, ConfigError, FlushTrigger, MonitorConfig};
use crate::models::{Target, TargetError};

use clap::Parser;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// Probe hosts on a fixed interval and plot their per-phase latencies.
#[derive(Parser, Debug)]
#[command(name = "latmon", version, about)]
pub struct Cli {
    /// Targets of the form SCHEME:HOST[:PORT]; SCHEME is http, https or
    /// icmp and IPv6 literals may be bracketed.
    #[arg(required = true, value_name = "SCHEME:HOST[:PORT]")]
    pub targets: Vec<String>,

    /// Send a probe every SECS seconds.
    #[arg(short = 'i', long = "every", value_name = "SECS", value_parser = secs)]
    pub every: Option<Duration>,

    /// Give up on each network phase after SECS seconds.
    #[arg(short, long, value_name = "SECS", value_parser = secs)]
    pub timeout: Option<Duration>,

    /// Collect N samples per persisted batch.
    #[arg(short, long, value_name = "N")]
    pub batch_size: Option<usize>,

    /// Write stats and charts under DIR.
    #[arg(short = 'd', long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Consecutive failures tolerated before a target is unreachable.
    #[arg(long, value_name = "N")]
    pub max_failures: Option<u32>,

    /// Cut a batch when it fills (on-full) or when the next sample
    /// arrives (on-next-append).
    #[arg(long, value_name = "WHEN")]
    pub flush_trigger: Option<FlushTrigger>,

    /// Discard partially filled batches on shutdown.
    #[arg(long)]
    pub no_flush_on_stop: bool,

    /// Logging verbosity level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

fn secs(s: &str) -> Result<Duration, ConfigError> {
    parse_secs("duration", s)
}

impl Cli {
    /// Override `cfg` with every option given on the command line.
    pub fn apply(&self, cfg: &mut MonitorConfig) {
        if let Some(every) = self.every {
            cfg.interval = every;
        }
        if let Some(timeout) = self.timeout {
            cfg.timeout = timeout;
        }
        if let Some(n) = self.batch_size {
            cfg.batch_size = n;
        }
        if let Some(dir) = &self.output_dir {
            cfg.output_dir = dir.clone();
        }
        if let Some(n) = self.max_failures {
            cfg.max_failures = n;
        }
        if let Some(trigger) = self.flush_trigger {
            cfg.flush_trigger = trigger;
        }
        if self.no_flush_on_stop {
            cfg.flush_on_stop = false;
        }
    }

    /// Parse the target arguments, skipping duplicates.
    pub fn parse_targets(&self, cfg: &MonitorConfig) -> Result<Vec<Target>, TargetError> {
        let mut seen = HashSet::new();
        let mut targets = Vec::with_capacity(self.targets.len());
        for spec in &self.targets {
            let target = Target::parse(spec, cfg.interval, cfg.timeout)?;
            if !seen.insert(target.name()) {
                tracing::warn!("{}: duplicate; skipping", target);
                continue;
            }
            targets.push(target);
        }
        Ok(targets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Scheme;

    #[test]
    fn test_options_override_config() {
        let cli = Cli::try_parse_from([
            "latmon", "-i", "0.5", "--timeout", "1", "-b", "100", "-d", "/tmp/out",
            "--max-failures", "5", "--no-flush-on-stop", "--flush-trigger", "on-next-append",
            "https:example.com",
        ])
        .unwrap();

        let mut cfg = MonitorConfig::default();
        cli.apply(&mut cfg);
        assert_eq!(cfg.interval, Duration::from_millis(500));
        assert_eq!(cfg.timeout, Duration::from_secs(1));
        assert_eq!(cfg.batch_size, 100);
        assert_eq!(cfg.output_dir, PathBuf::from("/tmp/out"));
        assert_eq!(cfg.max_failures, 5);
        assert!(!cfg.flush_on_stop);
        assert_eq!(cfg.flush_trigger, FlushTrigger::OnNextAppend);
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn test_defaults_left_alone() {
        let cli = Cli::try_parse_from(["latmon", "icmp:192.0.2.1"]).unwrap();
        let mut cfg = MonitorConfig::default();
        cli.apply(&mut cfg);
        assert_eq!(cfg, MonitorConfig::default());
    }

    #[test]
    fn test_targets_deduplicated() {
        let cli = Cli::try_parse_from([
            "latmon",
            "https:example.com",
            "https:example.com:443",
            "http:example.com",
            "icmp:[::1]",
        ])
        .unwrap();
        let cfg = MonitorConfig::default();
        let targets = cli.parse_targets(&cfg).unwrap();

        let names: Vec<String> = targets.iter().map(Target::name).collect();
        assert_eq!(names, ["https:example.com:443", "http:example.com:80", "icmp:::1"]);
        assert_eq!(targets[2].scheme, Scheme::Icmp);
        assert_eq!(targets[0].interval, cfg.interval);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(Cli::try_parse_from(["latmon"]).is_err());
        assert!(Cli::try_parse_from(["latmon", "-i", "often", "icmp:h"]).is_err());
        assert!(Cli::try_parse_from(["latmon", "--flush-trigger", "never", "icmp:h"]).is_err());

        let cli = Cli::try_parse_from(["latmon", "ftp:example.com"]).unwrap();
        assert!(matches!(
            cli.parse_targets(&MonitorConfig::default()),
            Err(TargetError::UnknownScheme(_))
        ));
    }
}
