//! Websocket upgrade negotiation
//!
//! The upgrade request is where the relay learns what to do: the
//! destination authority and the shared secret travel as request headers,
//! and the relay answers 101 only if it accepts both.

use super::{TunnelConnection, TunnelError};
use crate::config::RelayAddress;
use crate::obfuscation::BrowserProfile;
use crate::protocol::{SECRET_HEADER, TARGET_HEADER};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::{timeout_at, Instant};
use tokio_tungstenite::client_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{header, HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Error as WsError;
use tracing::debug;

/// Performs the upgrade handshake against one relay
#[derive(Debug, Clone)]
pub struct Negotiator {
    relay: RelayAddress,
    secret: String,
}

impl Negotiator {
    pub fn new(relay: RelayAddress, secret: impl Into<String>) -> Self {
        Self {
            relay,
            secret: secret.into(),
        }
    }

    pub fn relay(&self) -> &RelayAddress {
        &self.relay
    }

    /// Build the upgrade request for `target`
    pub fn build_request(
        &self,
        target: &str,
        profile: BrowserProfile,
    ) -> Result<Request, TunnelError> {
        let mut request = self
            .relay
            .url()
            .into_client_request()
            .map_err(TunnelError::Handshake)?;

        let headers = request.headers_mut();
        headers.insert(header_name(TARGET_HEADER)?, header_value(TARGET_HEADER, target)?);
        headers.insert(header_name(SECRET_HEADER)?, header_value(SECRET_HEADER, &self.secret)?);
        headers.insert(header::USER_AGENT, HeaderValue::from_static(profile.user_agent()));

        Ok(request)
    }

    /// Upgrade `stream` into a tunnel to `target`.
    ///
    /// Must complete before `deadline`. A non-101 answer is returned as
    /// [`TunnelError::Rejected`] with whatever body the relay sent.
    pub async fn negotiate<S>(
        &self,
        stream: S,
        target: &str,
        profile: BrowserProfile,
        deadline: Instant,
    ) -> Result<TunnelConnection<S>, TunnelError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let request = self.build_request(target, profile)?;

        let (ws, response) = match timeout_at(deadline, client_async(request, stream)).await {
            Err(_) => return Err(TunnelError::Timeout),
            Ok(Err(WsError::Http(response))) => {
                let body = response
                    .body()
                    .as_ref()
                    .map(|body| String::from_utf8_lossy(body).into_owned())
                    .unwrap_or_default();
                return Err(TunnelError::Rejected {
                    status: response.status().as_u16(),
                    body,
                });
            }
            Ok(Err(e)) => return Err(TunnelError::Handshake(e)),
            Ok(Ok(upgraded)) => upgraded,
        };

        debug!(
            "Tunnel to {} negotiated via {} ({})",
            target,
            self.relay,
            response.status()
        );

        Ok(TunnelConnection::new(ws))
    }
}

fn header_name(name: &'static str) -> Result<HeaderName, TunnelError> {
    HeaderName::from_bytes(name.as_bytes()).map_err(|_| TunnelError::InvalidHeader(name))
}

fn header_value(name: &'static str, value: &str) -> Result<HeaderValue, TunnelError> {
    HeaderValue::from_str(value).map_err(|_| TunnelError::InvalidHeader(name))
}
