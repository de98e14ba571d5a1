//! ICMP echo probe with native sockets and a `ping` command fallback.
//!
//! Native echo runs on a blocking socket inside `spawn_blocking` so the
//! round trip is timed without runtime scheduling noise.

use std::io::{self, Read};
use std::net::{IpAddr, SocketAddr};
use std::process::Stdio;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use regex::Regex;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::process::Command;

use super::{resolve, Cycle, Probe, ProbeError, ProberState};
use crate::models::{PingResult, Target};

const ECHO_REQUEST_V4: u8 = 8;
const ECHO_REPLY_V4: u8 = 0;
const ECHO_REQUEST_V6: u8 = 128;
const ECHO_REPLY_V6: u8 = 129;
const PACKET_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq)]
enum IcmpCapability {
    Native,
    CommandOnly,
}

static ICMP_CAPABILITY: OnceLock<IcmpCapability> = OnceLock::new();

static PING_SEQUENCE: AtomicU16 = AtomicU16::new(0);

fn detect_icmp_capability() -> IcmpCapability {
    if Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4)).is_ok() {
        tracing::info!("icmp: using native raw sockets");
        return IcmpCapability::Native;
    }
    if Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::ICMPV4)).is_ok() {
        tracing::info!("icmp: using native datagram sockets");
        return IcmpCapability::Native;
    }
    tracing::info!("icmp: native sockets unavailable, using ping command");
    IcmpCapability::CommandOnly
}

/// Probe measuring ICMP echo round-trip time.
pub struct IcmpProbe {
    target: Target,
}

impl IcmpProbe {
    pub fn new(target: Target) -> Self {
        Self { target }
    }
}

impl Probe for IcmpProbe {
    async fn ping(&mut self, cycle: &Cycle<'_>) -> Result<PingResult, ProbeError> {
        let target = &self.target;
        let timeout = target.timeout;

        let ip = match target.literal_addr() {
            Some(ip) => ip,
            None => {
                cycle.enter(ProberState::Resolving)?;
                resolve(&target.host, 0, timeout).await?
            }
        };

        cycle.enter(ProberState::AwaitingResponse)?;
        let rtt = match *ICMP_CAPABILITY.get_or_init(detect_icmp_capability) {
            IcmpCapability::Native => {
                let echo = tokio::task::spawn_blocking(move || echo(ip, timeout))
                    .await
                    .map_err(|e| ProbeError::Network(format!("icmp task failed: {}", e)))?;
                match echo {
                    Ok(rtt) => rtt,
                    Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                        tracing::warn!("{}: native icmp denied, falling back to ping: {}", target, e);
                        run_ping_command(ip, timeout).await?
                    }
                    Err(e) if is_timeout(&e) => {
                        return Err(ProbeError::Timeout {
                            phase: ProberState::AwaitingResponse,
                            after: timeout,
                        })
                    }
                    Err(e) => return Err(ProbeError::Network(format!("icmp {}: {}", ip, e))),
                }
            }
            IcmpCapability::CommandOnly => run_ping_command(ip, timeout).await?,
        };
        cycle.mark(ProberState::Measuring);

        Ok(PingResult::Icmp { rtt })
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

/// Send one echo request and wait for its reply.
fn echo(ip: IpAddr, timeout: Duration) -> io::Result<Duration> {
    let (domain, proto) = match ip {
        IpAddr::V4(_) => (Domain::IPV4, Protocol::ICMPV4),
        IpAddr::V6(_) => (Domain::IPV6, Protocol::ICMPV6),
    };
    let (mut socket, raw) = match Socket::new(domain, Type::RAW, Some(proto)) {
        Ok(s) => (s, true),
        Err(_) => (Socket::new(domain, Type::DGRAM, Some(proto))?, false),
    };
    socket.set_write_timeout(Some(timeout))?;
    socket.connect(&SocketAddr::new(ip, 0).into())?;

    let identifier: u16 = rand::random();
    let sequence = PING_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let packet = build_echo_request(ip.is_ipv6(), identifier, sequence);

    let start = Instant::now();
    socket.send(&packet)?;

    let mut buf = [0u8; 1500];
    loop {
        let remaining = timeout.saturating_sub(start.elapsed());
        if remaining.is_zero() {
            return Err(io::ErrorKind::TimedOut.into());
        }
        socket.set_read_timeout(Some(remaining))?;
        let len = socket.read(&mut buf)?;
        let elapsed = start.elapsed();

        if is_reply(&buf[..len], ip.is_ipv6(), raw, identifier, sequence) {
            return Ok(elapsed);
        }
    }
}

/// Whether `buf` is the echo reply for `identifier`/`sequence`.
///
/// Raw IPv4 sockets deliver the IP header as well. Datagram sockets have
/// the kernel rewrite the identifier, so only the sequence is compared.
fn is_reply(buf: &[u8], v6: bool, raw: bool, identifier: u16, sequence: u16) -> bool {
    let offset = if raw && !v6 && buf.first().map_or(false, |b| b >> 4 == 4) {
        usize::from(buf[0] & 0x0f) * 4
    } else {
        0
    };
    let Some(icmp) = buf.get(offset..offset + 8) else {
        return false;
    };

    let want = if v6 { ECHO_REPLY_V6 } else { ECHO_REPLY_V4 };
    let id = u16::from_be_bytes([icmp[4], icmp[5]]);
    let seq = u16::from_be_bytes([icmp[6], icmp[7]]);
    icmp[0] == want && seq == sequence && (!raw || id == identifier)
}

/// Echo request with a timestamp payload. The ICMPv6 checksum is left to
/// the kernel.
fn build_echo_request(v6: bool, identifier: u16, sequence: u16) -> Vec<u8> {
    let mut packet = vec![0u8; PACKET_LEN];
    packet[0] = if v6 { ECHO_REQUEST_V6 } else { ECHO_REQUEST_V4 };
    packet[4..6].copy_from_slice(&identifier.to_be_bytes());
    packet[6..8].copy_from_slice(&sequence.to_be_bytes());

    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    packet[8..16].copy_from_slice(&stamp.to_be_bytes());

    if !v6 {
        let checksum = icmp_checksum(&packet);
        packet[2..4].copy_from_slice(&checksum.to_be_bytes());
    }
    packet
}

/// RFC 1071 internet checksum.
fn icmp_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = data
        .chunks(2)
        .map(|c| u32::from(u16::from_be_bytes([c[0], c.get(1).copied().unwrap_or(0)])))
        .sum();
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

async fn run_ping_command(ip: IpAddr, timeout: Duration) -> Result<Duration, ProbeError> {
    let wait = timeout.as_secs().max(1).to_string();
    let addr = ip.to_string();

    let output = Command::new("ping")
        .args(["-c", "1", "-W", &wait, &addr])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| ProbeError::Command(format!("failed to execute ping: {}", e)))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("timeout") || stdout.contains("100% packet loss") || stdout.contains("100.0% packet loss") {
            return Err(ProbeError::Timeout {
                phase: ProberState::AwaitingResponse,
                after: timeout,
            });
        }
        return Err(ProbeError::Command(format!("ping {}: {}", addr, stdout.trim())));
    }

    parse_ping_output(&stdout)
}

/// Round-trip time from `ping` output: the per-packet `time=` field, or
/// the average of a summary line.
fn parse_ping_output(output: &str) -> Result<Duration, ProbeError> {
    static PATTERNS: OnceLock<Vec<(Regex, usize)>> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        [
            (r"time[=<]([0-9.]+)\s*ms", 1),
            (r"round-trip\s+min/avg/max/stddev\s*=\s*([0-9.]+)/([0-9.]+)/([0-9.]+)", 2),
            (r"rtt\s+min/avg/max/mdev\s*=\s*([0-9.]+)/([0-9.]+)/([0-9.]+)", 2),
        ]
        .into_iter()
        .filter_map(|(re, group)| Regex::new(re).ok().map(|re| (re, group)))
        .collect()
    });

    patterns
        .iter()
        .filter_map(|(re, group)| re.captures(output)?.get(*group)?.as_str().parse::<f64>().ok())
        .find(|ms| ms.is_finite() && *ms >= 0.0)
        .map(|ms| Duration::from_nanos((ms * 1_000_000.0).round() as u64))
        .ok_or_else(|| ProbeError::Command(format!("failed to parse ping output: {}", output)))
}
