//! Local proxy front end
//!
//! Accepts HTTP CONNECT requests, answers them with the synthetic success
//! line and hands the raw client stream plus the requested authority to a
//! session handler.

#[cfg(feature = "http-proxy")]
mod http;

#[cfg(feature = "http-proxy")]
pub use http::{ClientStream, HttpProxyServer};

use thiserror::Error;

/// Proxy errors
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Not a failure: the request was answered with 503
    #[error("Unsupported method: {0}")]
    UnsupportedMethod(String),

    #[error("Malformed request: {0}")]
    MalformedRequest(String),
}
