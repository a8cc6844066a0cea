//! Per-session tunnel pipeline
//!
//! One [`TunnelClient`] is built at startup from the validated settings and
//! shared by every accepted CONNECT request. Each call to
//! [`TunnelClient::serve`] runs a complete, independent session:
//! dial -> negotiate -> relay.

use crate::config::TunnelSettings;
use crate::protocol::DIAL_TIMEOUT;
use crate::transport::{FingerprintDialer, RelayStream};
use crate::tunnel::{Negotiator, RelaySession, TunnelConnection};
use crate::Result;
use rustls::RootCertStore;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;
use tracing::debug;

/// Opens tunnels to the configured relay
#[derive(Debug, Clone)]
pub struct TunnelClient {
    dialer: FingerprintDialer,
    negotiator: Negotiator,
    chunk_size: usize,
}

impl TunnelClient {
    pub fn new(settings: &TunnelSettings) -> Self {
        Self {
            dialer: FingerprintDialer::new(settings.profile),
            negotiator: Negotiator::new(settings.relay.clone(), settings.secret.clone()),
            chunk_size: settings.chunk_size,
        }
    }

    /// Like [`TunnelClient::new`] but trusting only `roots` for the relay
    /// certificate
    pub fn with_roots(settings: &TunnelSettings, roots: Arc<RootCertStore>) -> Self {
        Self {
            dialer: FingerprintDialer::with_roots(settings.profile, roots),
            ..Self::new(settings)
        }
    }

    /// Dial the relay and negotiate a tunnel to `target`, all before
    /// `deadline`
    pub async fn connect(
        &self,
        target: &str,
        deadline: Instant,
    ) -> Result<TunnelConnection<RelayStream>> {
        let relay = self.negotiator.relay();
        let dialed = self.dialer.dial(&relay.dial_addr(), &relay.host, deadline).await?;

        let tunnel = self
            .negotiator
            .negotiate(dialed.stream, target, dialed.profile, deadline)
            .await?;

        Ok(tunnel)
    }

    /// Run one session: tunnel `client` to `target` until either side ends.
    ///
    /// The success line must already have been written to `client`. On a
    /// dial or negotiation failure `client` is dropped, closing it, without
    /// any further response.
    pub async fn serve<C>(&self, client: C, target: &str) -> Result<()>
    where
        C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let deadline = Instant::now() + DIAL_TIMEOUT;
        let tunnel = self.connect(target, deadline).await?;

        debug!("Relaying {} via {}", target, self.negotiator.relay());
        RelaySession::new(client, tunnel, self.chunk_size).run().await?;
        debug!("Session to {} finished", target);

        Ok(())
    }
}
