//! HTTP(S) probe with per-phase timings.
//!
//! Every attempt uses a fresh connection: resolve, dial, optional TLS
//! handshake, write a `HEAD /`, read the response header block, close.

use super::{resolve, server_name, within, Cycle, Probe, ProbeError, ProberState};
use crate::http::{read_response, ConnCloser, Request, Stream};
use crate::models::{HttpTimings, PingResult, Scheme, Target};

use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

/// Probe measuring DNS, connect, TLS and request/response latency.
pub struct HttpProbe {
    target: Target,
    tls: Option<TlsConnector>,
    request: Request,
}

impl HttpProbe {
    /// Probe for an `http` or `https` target, verifying https peers
    /// against the web PKI roots.
    pub fn new(target: Target) -> Result<Self, ProbeError> {
        let tls = match target.scheme {
            Scheme::Https => Some(super::connector()?),
            _ => None,
        };
        Ok(Self::with_connector(target, tls))
    }

    /// Probe using the given TLS connector; `None` speaks plain HTTP.
    pub fn with_connector(target: Target, tls: Option<TlsConnector>) -> Self {
        let request = Request::probe(&host_header(&target));
        Self {
            target,
            tls,
            request,
        }
    }
}

impl Probe for HttpProbe {
    async fn ping(&mut self, cycle: &Cycle<'_>) -> Result<PingResult, ProbeError> {
        let start = Instant::now();
        let target = &self.target;
        let timeout = target.timeout;
        let mut timings = HttpTimings::default();

        let ip = match target.literal_addr() {
            Some(ip) => ip,
            None => {
                cycle.enter(ProberState::Resolving)?;
                let st = Instant::now();
                let ip = resolve(&target.host, target.port, timeout).await?;
                timings.dns = st.elapsed();
                ip
            }
        };
        let addr = SocketAddr::new(ip, target.port);

        cycle.enter(ProberState::Connecting)?;
        let st = Instant::now();
        let tcp = within(ProberState::Connecting, timeout, TcpStream::connect(addr))
            .await?
            .map_err(|source| ProbeError::Connect { addr, source })?;
        timings.connect = st.elapsed();
        if let Err(e) = tcp.set_nodelay(true) {
            tracing::debug!("{}: set_nodelay: {}", target, e);
        }

        let stream: Box<dyn Stream> = match &self.tls {
            Some(connector) => {
                let name = server_name(&target.host)?;
                cycle.enter(ProberState::TlsHandshake)?;
                let st = Instant::now();
                let tls = within(ProberState::TlsHandshake, timeout, connector.connect(name, tcp))
                    .await?
                    .map_err(|source| ProbeError::Tls { addr, source })?;
                timings.tls = st.elapsed();
                Box::new(tls)
            }
            None => Box::new(tcp),
        };
        let mut conn = ConnCloser::new(stream);

        cycle.enter(ProberState::Sending)?;
        let st = Instant::now();
        within(ProberState::Sending, timeout, self.request.write_to(conn.get_mut()))
            .await?
            .map_err(|source| ProbeError::Send {
                host: target.host.clone(),
                source,
            })?;

        cycle.enter(ProberState::AwaitingResponse)?;
        let resp = within(ProberState::AwaitingResponse, timeout, read_response(conn))
            .await?
            .map_err(|source| ProbeError::Response {
                host: target.host.clone(),
                source,
            })?;
        timings.http = st.elapsed();
        timings.e2e = start.elapsed();

        cycle.mark(ProberState::Measuring);
        tracing::debug!("{}: {} {}", target, resp.proto, resp.status);

        // The body is never read; closing releases the connection.
        close_quietly(target, resp.body.close(), timeout).await;

        Ok(PingResult::Http(timings))
    }
}

async fn close_quietly<F>(target: &Target, close: F, timeout: Duration)
where
    F: std::future::Future<Output = Result<(), crate::http::HttpError>>,
{
    match within(ProberState::Measuring, timeout, close).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::debug!("{}: close: {}", target, e),
        Err(e) => tracing::debug!("{}: close: {}", target, e),
    }
}

/// `Host` header value: bracketed IPv6, port only when non-default.
fn host_header(target: &Target) -> String {
    let host = match target.literal_addr() {
        Some(IpAddr::V6(_)) => format!("[{}]", target.host),
        _ => target.host.clone(),
    };
    if target.port == target.scheme.default_port() {
        host
    } else {
        format!("{}:{}", host, target.port)
    }
}
