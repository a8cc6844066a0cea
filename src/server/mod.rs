//! Reference relay server
//!
//! Terminates the websocket tunnel (optionally behind TLS), authenticates
//! the upgrade with the shared secret, connects to the requested
//! destination and runs the same relay engine the proxy side uses, with
//! the destination socket as the stream side.

use crate::config::RelaySettings;
use crate::protocol::{
    check_secret, check_target, ProtocolError, DIAL_TIMEOUT, SECRET_HEADER, TARGET_HEADER,
};
use crate::transport::TransportError;
use crate::tunnel::{RelaySession, TunnelConnection, TunnelError};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::time::{timeout, timeout_at, Instant};
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tracing::{debug, info};

/// Relay server errors
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("Failed to load {path}: {reason}")]
    Pem { path: String, reason: String },

    #[error("Server is shutting down")]
    Shutdown,
}

struct Shared {
    secret: String,
    chunk_size: usize,
    limit: Semaphore,
}

/// Websocket relay endpoint
pub struct RelayServer {
    listener: TcpListener,
    acceptor: Option<TlsAcceptor>,
    shared: Arc<Shared>,
    handshake_timeout: Duration,
}

impl RelayServer {
    /// Bind to the configured address, loading the TLS certificate and key
    /// if configured
    pub async fn bind(settings: &RelaySettings) -> Result<Self, ServerError> {
        let acceptor = match &settings.tls {
            Some((cert, key)) => {
                let acceptor = load_tls_acceptor(cert, key)?;
                info!("TLS enabled with cert: {}", cert);
                Some(acceptor)
            }
            None => {
                info!("TLS disabled (no tls_cert/tls_key configured)");
                None
            }
        };

        let listener = TcpListener::bind(settings.listen).await?;
        Ok(Self::from_listener(listener, acceptor, settings))
    }

    /// Serve on an already bound listener
    pub fn from_listener(
        listener: TcpListener,
        acceptor: Option<TlsAcceptor>,
        settings: &RelaySettings,
    ) -> Self {
        Self {
            listener,
            acceptor,
            shared: Arc::new(Shared {
                secret: settings.secret.clone(),
                chunk_size: settings.chunk_size,
                limit: Semaphore::new(settings.max_connections),
            }),
            handshake_timeout: DIAL_TIMEOUT,
        }
    }

    /// Limit the time a connection may spend in the TLS and websocket
    /// handshakes while holding a connection slot. Defaults to `DIAL_TIMEOUT`.
    pub fn with_handshake_timeout(mut self, handshake_timeout: Duration) -> Self {
        self.handshake_timeout = handshake_timeout;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections forever
    pub async fn run(&self) -> Result<(), ServerError> {
        info!("Relay listening on {}", self.local_addr()?);

        loop {
            let (stream, peer_addr) = self.listener.accept().await?;
            debug!("New connection from {}", peer_addr);

            let shared = Arc::clone(&self.shared);
            let acceptor = self.acceptor.clone();
            let handshake_timeout = self.handshake_timeout;
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, shared, acceptor, handshake_timeout).await
                {
                    debug!("Connection from {}: {}", peer_addr, e);
                }
            });
        }
    }
}

/// Build a TLS acceptor from PEM certificate chain and key files
pub fn load_tls_acceptor(cert_path: &str, key_path: &str) -> Result<TlsAcceptor, ServerError> {
    tls_acceptor(load_certs(cert_path)?, load_private_key(key_path)?)
}

/// Build a TLS acceptor for the given certificate chain and key
pub fn tls_acceptor(
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> Result<TlsAcceptor, ServerError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| ServerError::Tls(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ServerError::Tls(e.to_string()))?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>, ServerError> {
    let pem_error = |reason: String| ServerError::Pem {
        path: path.to_string(),
        reason,
    };

    let mut file = std::io::BufReader::new(
        std::fs::File::open(path).map_err(|e| pem_error(e.to_string()))?,
    );
    let certs = rustls_pemfile::certs(&mut file)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| pem_error(e.to_string()))?;
    if certs.is_empty() {
        return Err(pem_error("no certificates found".into()));
    }
    debug!("Loaded {} certificate(s) from {}", certs.len(), path);
    Ok(certs)
}

fn load_private_key(path: &str) -> Result<PrivateKeyDer<'static>, ServerError> {
    let pem_error = |reason: String| ServerError::Pem {
        path: path.to_string(),
        reason,
    };

    let mut file = std::io::BufReader::new(
        std::fs::File::open(path).map_err(|e| pem_error(e.to_string()))?,
    );
    rustls_pemfile::private_key(&mut file)
        .map_err(|e| pem_error(e.to_string()))?
        .ok_or_else(|| pem_error("no private key found".into()))
}

async fn handle_connection(
    stream: TcpStream,
    shared: Arc<Shared>,
    acceptor: Option<TlsAcceptor>,
    handshake_timeout: Duration,
) -> crate::Result<()> {
    let _permit = shared
        .limit
        .acquire()
        .await
        .map_err(|_| ServerError::Shutdown)?;

    stream.set_nodelay(true)?;

    // Silent peers must not hold a slot past the handshake budget
    let deadline = Instant::now() + handshake_timeout;

    match acceptor {
        Some(acceptor) => {
            let tls_stream = timeout_at(deadline, acceptor.accept(stream))
                .await
                .map_err(|_| TransportError::Timeout)?
                .map_err(|e| TransportError::Tls(e.to_string()))?;
            debug!("TLS handshake complete with client");
            serve_tunnel(tls_stream, &shared, deadline).await
        }
        None => serve_tunnel(stream, &shared, deadline).await,
    }
}

/// Authenticate the upgrade, dial the destination and relay
async fn serve_tunnel<S>(stream: S, shared: &Shared, deadline: Instant) -> crate::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut accepted = None;
    let callback = |req: &Request, response: Response| -> Result<Response, ErrorResponse> {
        match authorize(req, &shared.secret) {
            Ok(target) => {
                accepted = Some(target);
                Ok(response)
            }
            Err(e) => {
                debug!("Rejected upgrade: {}", e);
                Err(rejection(&e))
            }
        }
    };

    let ws = timeout_at(deadline, accept_hdr_async(stream, callback))
        .await
        .map_err(|_| TunnelError::Timeout)?
        .map_err(TunnelError::Handshake)?;
    let tunnel = TunnelConnection::new(ws);

    // Set by the callback whenever the upgrade succeeds
    let Some((target, host, port)) = accepted else {
        return Err(ProtocolError::MissingHeader(TARGET_HEADER).into());
    };

    let upstream = match timeout(DIAL_TIMEOUT, TcpStream::connect((host.as_str(), port))).await {
        Ok(Ok(upstream)) => upstream,
        Ok(Err(source)) => {
            tunnel.close().await.ok();
            return Err(TransportError::Connect { addr: target, source }.into());
        }
        Err(_) => {
            tunnel.close().await.ok();
            return Err(TransportError::Timeout.into());
        }
    };
    upstream.set_nodelay(true).ok();

    info!("Relaying to {}", target);
    RelaySession::new(upstream, tunnel, shared.chunk_size).run().await?;
    debug!("Session to {} finished", target);

    Ok(())
}

/// Check the upgrade headers. Returns the raw target and the host and
/// port to dial.
fn authorize(req: &Request, secret: &str) -> Result<(String, String, u16), ProtocolError> {
    check_secret(header(req, SECRET_HEADER), secret)?;

    let target = header(req, TARGET_HEADER).unwrap_or_default();
    let (host, port) = check_target(target)?;
    let host = host.trim_start_matches('[').trim_end_matches(']');

    Ok((target.to_string(), host.to_string(), port))
}

fn header<'r>(req: &'r Request, name: &str) -> Option<&'r str> {
    req.headers().get(name).and_then(|v| v.to_str().ok())
}

fn rejection(error: &ProtocolError) -> ErrorResponse {
    let (status, body) = match error {
        ProtocolError::InvalidTarget(_) => (StatusCode::BAD_REQUEST, "Invalid Target"),
        ProtocolError::MissingHeader(_) | ProtocolError::SecretMismatch => {
            (StatusCode::FORBIDDEN, "Unauthorized")
        }
    };

    let mut response = ErrorResponse::new(Some(body.to_string()));
    *response.status_mut() = status;
    response
}
