//! # WSS Tunnel
//!
//! A local HTTP CONNECT proxy that carries each proxied connection to a
//! remote relay inside a websocket over TLS, shaped to look like ordinary
//! browser traffic.
//!
//! ## Features
//!
//! - **TLS fingerprint randomization** across realistic browser profiles
//! - **Authenticated upgrade** carrying the destination and a shared secret
//! - **One session per CONNECT**, no shared state between sessions
//! - **Reference relay** speaking the same protocol
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  Proxy Front End                     │
//! │        (CONNECT accept, synthetic success line)      │
//! ├─────────────────────────────────────────────────────┤
//! │                   Tunnel Layer                       │
//! │   (Upgrade negotiation, message channel, relay)      │
//! ├─────────────────────────────────────────────────────┤
//! │                 Obfuscation Layer                    │
//! │         (Browser profiles, TLS client config)        │
//! ├─────────────────────────────────────────────────────┤
//! │                  Transport Layer                     │
//! │          (TCP connect + TLS under a deadline)        │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod client;
pub mod config;
pub mod logging;
pub mod obfuscation;
pub mod protocol;
pub mod proxy;
pub mod server;
pub mod transport;
pub mod tunnel;

pub use client::TunnelClient;
pub use config::Config;
pub use server::RelayServer;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] protocol::ProtocolError),

    #[error("Transport error: {0}")]
    Transport(#[from] transport::TransportError),

    #[error("Tunnel error: {0}")]
    Tunnel(#[from] tunnel::TunnelError),

    #[error("Proxy error: {0}")]
    Proxy(#[from] proxy::ProxyError),

    #[error("Server error: {0}")]
    Server(#[from] server::ServerError),
}
