//! TLS dialer with fingerprint mimicry
//!
//! Every dial resolves the configured [`BrowserProfile`] afresh, so a
//! `Random` dialer presents a different browser shape from one session to
//! the next.

use super::TransportError;
use crate::obfuscation::{build_tls_config, BrowserProfile, FingerprintConfig};
use rustls::pki_types::ServerName;
use rustls::RootCertStore;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::time::{timeout_at, Instant};
use tokio_rustls::{client::TlsStream, TlsConnector};
use tracing::debug;

/// Encrypted stream to the relay
pub type RelayStream = TlsStream<TcpStream>;

/// An established relay stream and the profile its handshake used
pub struct DialedStream {
    pub stream: RelayStream,
    pub profile: BrowserProfile,
}

/// Opens fingerprinted TLS connections to the relay
#[derive(Debug, Clone)]
pub struct FingerprintDialer {
    fingerprint: FingerprintConfig,
}

impl FingerprintDialer {
    /// Create a dialer trusting the bundled web PKI roots
    pub fn new(profile: BrowserProfile) -> Self {
        Self {
            fingerprint: FingerprintConfig::new(profile),
        }
    }

    /// Create a dialer trusting only the given roots
    pub fn with_roots(profile: BrowserProfile, roots: Arc<RootCertStore>) -> Self {
        Self {
            fingerprint: FingerprintConfig::with_roots(profile, roots),
        }
    }

    /// Connect to `addr` and complete a TLS handshake for `server_name`.
    ///
    /// Both the TCP connect and the handshake must finish before `deadline`.
    /// The deadline does not outlive this call. On failure the TCP socket
    /// is dropped, closing it; no retry is made.
    pub async fn dial(
        &self,
        addr: &str,
        server_name: &str,
        deadline: Instant,
    ) -> Result<DialedStream, TransportError> {
        let (tls_config, profile) =
            build_tls_config(&self.fingerprint).map_err(|e| TransportError::Tls(e.to_string()))?;

        // Parse SNI (this is what appears in the ClientHello)
        let sni = ServerName::try_from(server_name.to_string())
            .map_err(|e| TransportError::InvalidServerName(format!("{}: {}", server_name, e)))?;

        let tcp_stream = timeout_at(deadline, TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|source| TransportError::Connect {
                addr: addr.to_string(),
                source,
            })?;

        // Configure TCP options
        tcp_stream.set_nodelay(true).ok();

        let connector = TlsConnector::from(Arc::new(tls_config));

        // Perform TLS handshake with browser-mimicked fingerprint
        let stream = timeout_at(deadline, connector.connect(sni, tcp_stream))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::Tls(e.to_string()))?;

        debug!("TLS handshake with {} complete ({:?})", addr, profile);

        Ok(DialedStream { stream, profile })
    }
}
