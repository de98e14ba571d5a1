//! Target and measurement types shared by probes and aggregation.

use std::fmt;
use std::net::{IpAddr, Ipv6Addr};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Errors from parsing a `SCHEME:HOST[:PORT]` target specification.
#[derive(Error, Debug, PartialEq)]
pub enum TargetError {
    #[error("malformed target specification '{0}'")]
    Malformed(String),
    #[error("unknown scheme '{0}'")]
    UnknownScheme(String),
    #[error("invalid port in '{0}'")]
    InvalidPort(String),
}

/// How a target is probed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
    Icmp,
}

const HTTPS_METRICS: &[&str] = &["dns", "tcp", "tls", "http", "e2e"];
const HTTP_METRICS: &[&str] = &["dns", "tcp", "http", "e2e"];
const ICMP_METRICS: &[&str] = &["rtt"];

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
            Scheme::Icmp => "icmp",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
            Scheme::Icmp => 0,
        }
    }

    /// Metric columns recorded for this scheme, in CSV order.
    pub fn metrics(&self) -> &'static [&'static str] {
        match self {
            Scheme::Http => HTTP_METRICS,
            Scheme::Https => HTTPS_METRICS,
            Scheme::Icmp => ICMP_METRICS,
        }
    }

    /// The metric whose buffer decides when a batch is full.
    pub fn primary_metric(&self) -> &'static str {
        match self {
            Scheme::Http | Scheme::Https => "e2e",
            Scheme::Icmp => "rtt",
        }
    }
}

impl FromStr for Scheme {
    type Err = TargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(Scheme::Http),
            "https" => Ok(Scheme::Https),
            "icmp" | "ping" => Ok(Scheme::Icmp),
            other => Err(TargetError::UnknownScheme(other.to_string())),
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A monitored endpoint. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    pub interval: Duration,
    pub timeout: Duration,
}

impl Target {
    pub fn new(scheme: Scheme, host: &str, port: u16, interval: Duration, timeout: Duration) -> Self {
        Self {
            scheme,
            host: host.to_string(),
            port,
            interval,
            timeout,
        }
    }

    /// Parse `SCHEME:HOST[:PORT]`; IPv6 literals may be bracketed.
    pub fn parse(spec: &str, interval: Duration, timeout: Duration) -> Result<Self, TargetError> {
        let (scheme, rest) = spec
            .split_once(':')
            .ok_or_else(|| TargetError::Malformed(spec.to_string()))?;
        let scheme: Scheme = scheme.parse()?;

        let (host, port) = split_host_port(rest, spec)?;
        if host.is_empty() {
            return Err(TargetError::Malformed(spec.to_string()));
        }
        let port = match port {
            Some(p) if scheme == Scheme::Icmp => {
                return Err(TargetError::InvalidPort(format!("{} (icmp has no port: {})", spec, p)))
            }
            Some(p) => p
                .parse::<u16>()
                .ok()
                .filter(|p| *p != 0)
                .ok_or_else(|| TargetError::InvalidPort(spec.to_string()))?,
            None => scheme.default_port(),
        };

        Ok(Self::new(scheme, host, port, interval, timeout))
    }

    /// Unique key for this target, e.g. `https:example.com:443`.
    pub fn name(&self) -> String {
        match self.scheme {
            Scheme::Icmp => format!("{}:{}", self.scheme, self.host),
            _ => format!("{}:{}:{}", self.scheme, self.host, self.port),
        }
    }

    /// Filesystem-safe form of [`Target::name`].
    pub fn slug(&self) -> String {
        self.name()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
            .collect()
    }

    /// The host as an address, if it is a literal.
    pub fn literal_addr(&self) -> Option<IpAddr> {
        self.host.parse().ok()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

fn split_host_port<'a>(rest: &'a str, spec: &str) -> Result<(&'a str, Option<&'a str>), TargetError> {
    if let Some(inner) = rest.strip_prefix('[') {
        let (host, after) = inner
            .split_once(']')
            .ok_or_else(|| TargetError::Malformed(spec.to_string()))?;
        return match after {
            "" => Ok((host, None)),
            _ => match after.strip_prefix(':') {
                Some(port) => Ok((host, Some(port))),
                None => Err(TargetError::Malformed(spec.to_string())),
            },
        };
    }

    // A bare IPv6 literal carries no port.
    if rest.parse::<Ipv6Addr>().is_ok() {
        return Ok((rest, None));
    }

    match rest.split_once(':') {
        Some((host, port)) => Ok((host, Some(port))),
        None => Ok((rest, None)),
    }
}

/// Phase timings of one HTTP(S) probe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HttpTimings {
    pub dns: Duration,
    pub connect: Duration,
    /// Zero for plain http.
    pub tls: Duration,
    /// From request write to parsed response headers.
    pub http: Duration,
    pub e2e: Duration,
}

/// Outcome of one successful probe attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingResult {
    Http(HttpTimings),
    Icmp { rtt: Duration },
}

impl PingResult {
    /// Value of the named metric, if this result carries it.
    pub fn value(&self, metric: &str) -> Option<Duration> {
        match (self, metric) {
            (PingResult::Http(t), "dns") => Some(t.dns),
            (PingResult::Http(t), "tcp") => Some(t.connect),
            (PingResult::Http(t), "tls") => Some(t.tls),
            (PingResult::Http(t), "http") => Some(t.http),
            (PingResult::Http(t), "e2e") => Some(t.e2e),
            (PingResult::Icmp { rtt }, "rtt") => Some(*rtt),
            _ => None,
        }
    }
}

impl fmt::Display for PingResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PingResult::Http(t) => write!(
                f,
                "dns: {:?}, tcp: {:?}, tls: {:?}, http: {:?}, e2e: {:?}",
                t.dns, t.connect, t.tls, t.http, t.e2e
            ),
            PingResult::Icmp { rtt } => write!(f, "rtt: {:?}", rtt),
        }
    }
}
