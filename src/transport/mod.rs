//! Transport layer
//!
//! Opens the encrypted byte stream to the relay: a TCP connection wrapped
//! in a TLS session carrying a browser fingerprint. Everything here runs
//! under the session's dial deadline; once [`FingerprintDialer::dial`]
//! returns, the stream has no read or write timeout.

mod tls;

pub use tls::{DialedStream, FingerprintDialer, RelayStream};

use std::io;
use thiserror::Error;

/// Dial and TLS handshake errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Invalid server name: {0}")]
    InvalidServerName(String),

    #[error("Timeout")]
    Timeout,
}
