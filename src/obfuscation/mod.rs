//! Traffic obfuscation layer
//!
//! Makes the relay connection resemble a browser opening a secure
//! websocket: the TLS ClientHello follows a real browser's cipher suite
//! ordering and ALPN, the browser is picked at random per connection, and
//! the upgrade request carries the matching User-Agent.

mod fingerprint;

pub use fingerprint::{
    build_tls_config, webpki_root_store, BrowserProfile, FingerprintConfig, FingerprintError,
};
