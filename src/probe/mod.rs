//! Probe module for network latency measurement.
//!
//! A [`Probe`] performs one measurement attempt; a [`Prober`] drives a probe
//! on a fixed cadence and applies the consecutive-failure policy.

mod dns;
mod http;
mod ping;
mod prober;
mod tls;

pub use dns::*;
pub use self::http::*;
pub use ping::*;
pub use prober::*;
pub use tls::*;

use crate::http::HttpError;
use crate::models::PingResult;

use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("{phase}: timed out after {after:?}")]
    Timeout { phase: ProberState, after: Duration },
    #[error("dns: {host}: {source}")]
    Resolve { host: String, source: io::Error },
    #[error("dns: no addresses found for {0}")]
    NoAddress(String),
    #[error("dial {addr}: {source}")]
    Connect { addr: SocketAddr, source: io::Error },
    #[error("tls {addr}: {source}")]
    Tls { addr: SocketAddr, source: io::Error },
    #[error("tls: {0}")]
    TlsConfig(String),
    #[error("write {host}: {source}")]
    Send { host: String, source: io::Error },
    #[error("{host}: {source}")]
    Response { host: String, source: HttpError },
    #[error("network error: {0}")]
    Network(String),
    #[error("command failed: {0}")]
    Command(String),
    #[error("probe cancelled")]
    Cancelled,
}

impl ProbeError {
    /// True when the peer violated the HTTP wire format.
    pub fn is_protocol(&self) -> bool {
        matches!(self, ProbeError::Response { source, .. } if source.is_protocol())
    }
}

/// Where a prober is in its measurement cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProberState {
    Idle,
    Resolving,
    Connecting,
    TlsHandshake,
    Sending,
    AwaitingResponse,
    Measuring,
    Sleeping,
    Stopped,
}

impl fmt::Display for ProberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProberState::Idle => "idle",
            ProberState::Resolving => "dns",
            ProberState::Connecting => "dial",
            ProberState::TlsHandshake => "tls",
            ProberState::Sending => "write",
            ProberState::AwaitingResponse => "read",
            ProberState::Measuring => "measure",
            ProberState::Sleeping => "sleep",
            ProberState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Per-attempt handle given to a probe: publishes the current state and
/// gates every blocking call on cancellation.
pub struct Cycle<'a> {
    cancel: &'a CancellationToken,
    state: &'a watch::Sender<ProberState>,
}

impl<'a> Cycle<'a> {
    pub fn new(cancel: &'a CancellationToken, state: &'a watch::Sender<ProberState>) -> Self {
        Self { cancel, state }
    }

    /// Enter `state` ahead of a blocking call; fails once cancelled.
    pub fn enter(&self, state: ProberState) -> Result<(), ProbeError> {
        if self.cancel.is_cancelled() {
            return Err(ProbeError::Cancelled);
        }
        self.state.send_replace(state);
        Ok(())
    }

    /// Record a state change that involves no blocking call.
    pub fn mark(&self, state: ProberState) {
        self.state.send_replace(state);
    }
}

/// One kind of measurement. Each call is a complete, sequential attempt.
pub trait Probe: Send + 'static {
    fn ping(
        &mut self,
        cycle: &Cycle<'_>,
    ) -> impl Future<Output = Result<PingResult, ProbeError>> + Send;
}

/// Run `fut` under an absolute deadline of now + `timeout`.
pub(crate) async fn within<F: Future>(
    phase: ProberState,
    timeout: Duration,
    fut: F,
) -> Result<F::Output, ProbeError> {
    let deadline = tokio::time::Instant::now() + timeout;
    tokio::time::timeout_at(deadline, fut)
        .await
        .map_err(|_| ProbeError::Timeout { phase, after: timeout })
}
