//! Tunnel layer - message-oriented channel to the relay
//!
//! Provides:
//! - Upgrade negotiation carrying the destination and shared secret
//! - A connection exposing "read next tagged message" / "write binary message"
//! - The relay engine bridging a raw byte stream and that connection

mod connection;
mod negotiate;
mod relay;
mod signal;

pub use connection::{MessageKind, TunnelConnection, TunnelMessage, TunnelReader, TunnelWriter};
pub use negotiate::Negotiator;
pub use relay::RelaySession;
pub use signal::CompletionSignal;

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Tunnel layer errors
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("Relay rejected upgrade with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Upgrade handshake failed: {0}")]
    Handshake(#[source] tungstenite::Error),

    #[error("Invalid value for header {0}")]
    InvalidHeader(&'static str),

    #[error("Upgrade timed out")]
    Timeout,

    #[error("WebSocket error: {0}")]
    WebSocket(#[source] tungstenite::Error),

    #[error("Relay IO error: {0}")]
    Relay(#[from] std::io::Error),
}

impl TunnelError {
    /// Whether the error happened while negotiating, as opposed to relaying
    pub fn is_negotiation(&self) -> bool {
        matches!(
            self,
            Self::Rejected { .. } | Self::Handshake(_) | Self::InvalidHeader(_) | Self::Timeout
        )
    }
}
