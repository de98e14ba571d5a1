//! TLS client setup for https probes.

use super::ProbeError;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use std::sync::{Arc, OnceLock};
use tokio_rustls::TlsConnector;

static CLIENT_CONFIG: OnceLock<Arc<ClientConfig>> = OnceLock::new();

/// Connector verifying peers against the bundled web PKI roots.
///
/// The client config is built once and shared by every https prober.
pub fn connector() -> Result<TlsConnector, ProbeError> {
    let config = match CLIENT_CONFIG.get() {
        Some(config) => config.clone(),
        None => {
            let built = Arc::new(build_config()?);
            CLIENT_CONFIG.get_or_init(|| built).clone()
        }
    };
    Ok(TlsConnector::from(config))
}

fn build_config() -> Result<ClientConfig, ProbeError> {
    let roots = RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };

    let config =
        ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(|e| ProbeError::TlsConfig(e.to_string()))?
            .with_root_certificates(roots)
            .with_no_client_auth();
    Ok(config)
}

/// Name the peer certificate must be valid for.
pub fn server_name(host: &str) -> Result<ServerName<'static>, ProbeError> {
    ServerName::try_from(host.to_string())
        .map_err(|e| ProbeError::TlsConfig(format!("invalid server name {}: {}", host, e)))
}
