//! Protocol definitions and constants
//!
//! Shared by both ends of the tunnel: the header names carried in the
//! websocket upgrade, the literal lines the CONNECT front end writes, and
//! the destination checks the relay applies before dialing out.

use std::time::Duration;
use thiserror::Error;

/// Protocol errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Missing header: {0}")]
    MissingHeader(&'static str),

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Secret mismatch")]
    SecretMismatch,
}

/// Upgrade header naming the destination the relay should connect to
pub const TARGET_HEADER: &str = "X-Target";

/// Upgrade header carrying the shared secret
pub const SECRET_HEADER: &str = "X-Password";

/// Shared secret used when none is configured
pub const DEFAULT_SECRET: &str = "testPASSword";

/// Port assumed when the relay address omits one
pub const DEFAULT_RELAY_PORT: u16 = 443;

/// Written to the client once a CONNECT request is accepted
pub const CONNECT_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection Established\r\n\r\n";

/// Written to the client for any method other than CONNECT
pub const SERVICE_UNAVAILABLE: &[u8] = b"HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\n\r\n";

/// Written to the client when the request line cannot be parsed
pub const BAD_REQUEST: &[u8] = b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\n\r\n";

/// Budget for dial + TLS + upgrade of a single session
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on closing an endpoint once a session is over
pub const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Chunk size bounds, in KB
pub const MIN_CHUNK_KB: u32 = 1;
pub const MAX_CHUNK_KB: u32 = 1024;

/// Check a destination authority the way the relay does before dialing it.
///
/// The host and port are split on the last `:`; the host must be non-empty
/// and the port a number in 1-65535. Returns the host and port on success.
pub fn check_target(target: &str) -> Result<(&str, u16), ProtocolError> {
    let invalid = || ProtocolError::InvalidTarget(target.to_string());

    let (host, port) = target.rsplit_once(':').ok_or_else(invalid)?;
    if host.is_empty() {
        return Err(invalid());
    }

    let port: u16 = port.parse().map_err(|_| invalid())?;
    if port == 0 {
        return Err(invalid());
    }

    Ok((host, port))
}

/// Compare a presented secret against the expected one
pub fn check_secret(presented: Option<&str>, expected: &str) -> Result<(), ProtocolError> {
    match presented {
        None => Err(ProtocolError::MissingHeader(SECRET_HEADER)),
        Some(secret) if secret == expected => Ok(()),
        Some(_) => Err(ProtocolError::SecretMismatch),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_target() {
        assert_eq!(check_target("example.com:443").unwrap(), ("example.com", 443));
        assert_eq!(check_target("10.0.0.1:8080").unwrap(), ("10.0.0.1", 8080));
        assert_eq!(check_target("[::1]:22").unwrap(), ("[::1]", 22));

        assert!(check_target("example.com").is_err());
        assert!(check_target(":443").is_err());
        assert!(check_target("example.com:0").is_err());
        assert!(check_target("example.com:70000").is_err());
        assert!(check_target("example.com:https").is_err());
    }

    #[test]
    fn test_check_secret() {
        assert!(check_secret(Some("hunter2"), "hunter2").is_ok());
        assert_eq!(
            check_secret(Some("nope"), "hunter2"),
            Err(ProtocolError::SecretMismatch)
        );
        assert_eq!(
            check_secret(None, "hunter2"),
            Err(ProtocolError::MissingHeader(SECRET_HEADER))
        );
    }

    #[test]
    fn test_connect_line() {
        assert_eq!(
            CONNECT_ESTABLISHED,
            b"HTTP/1.1 200 Connection Established\r\n\r\n"
        );
    }
}
