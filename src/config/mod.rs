//! Configuration management
//!
//! Raw values come from a TOML file and/or command-line flags and are
//! checked once at startup. Validation turns a [`ProxyConfig`] into an
//! immutable [`TunnelSettings`] (and a [`RelayConfig`] into
//! [`RelaySettings`]); nothing downstream ever sees an unchecked value.

use crate::obfuscation::BrowserProfile;
use crate::protocol::{DEFAULT_RELAY_PORT, DEFAULT_SECRET, MAX_CHUNK_KB, MIN_CHUNK_KB};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Configuration errors, all fatal at startup
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("listen port {0} out of range (1-65535)")]
    PortOutOfRange(u32),

    #[error("chunk size {0} KB out of range ({}-{})", MIN_CHUNK_KB, MAX_CHUNK_KB)]
    ChunkOutOfRange(u32),

    #[error("invalid relay address '{0}', expected host[:port][/path]")]
    InvalidRelayAddress(String),

    #[error("unknown TLS profile '{0}'")]
    UnknownProfile(String),

    #[error("invalid listen address '{0}'")]
    InvalidListenAddress(String),

    #[error("TLS certificate and key must be given together")]
    IncompleteTls,

    #[error("failed to read config: {0}")]
    Read(String),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("failed to write config: {0}")]
    Write(String),
}

/// Main configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Local proxy configuration
    pub proxy: Option<ProxyConfig>,
    /// Relay server configuration
    pub relay: Option<RelayConfig>,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Read(e.to_string()))?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Write(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::Write(e.to_string()))
    }
}

/// Local proxy configuration, as written by the operator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// HTTP proxy listen port
    pub port: u32,
    /// Shared secret presented to the relay
    pub password: String,
    /// Relay address, `host[:port][/path]`
    pub relay: String,
    /// Size of each outbound websocket message, in KB
    pub chunk_kb: u32,
    /// Emit diagnostic detail
    pub debug: bool,
    /// TLS fingerprint profile
    pub tls_profile: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            password: DEFAULT_SECRET.to_string(),
            relay: String::new(),
            chunk_kb: 64,
            debug: false,
            tls_profile: "random".to_string(),
        }
    }
}

impl ProxyConfig {
    /// Check every option and freeze the result
    pub fn validate(&self) -> Result<TunnelSettings, ConfigError> {
        let listen_port = validate_port(self.port)?;
        let chunk_size = validate_chunk(self.chunk_kb)?;
        let relay = RelayAddress::parse(&self.relay)?;
        let profile = BrowserProfile::from_name(&self.tls_profile)
            .ok_or_else(|| ConfigError::UnknownProfile(self.tls_profile.clone()))?;

        Ok(TunnelSettings {
            listen_port,
            secret: self.password.clone(),
            relay,
            chunk_size,
            debug: self.debug,
            profile,
        })
    }
}

/// Validated, immutable proxy settings shared by every session
#[derive(Debug, Clone)]
pub struct TunnelSettings {
    pub listen_port: u16,
    pub secret: String,
    pub relay: RelayAddress,
    /// Chunk size in bytes
    pub chunk_size: usize,
    pub debug: bool,
    pub profile: BrowserProfile,
}

/// Relay server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Listen address
    pub listen: String,
    /// Shared secret expected from clients
    pub password: String,
    /// TLS certificate path (PEM)
    pub tls_cert: Option<String>,
    /// TLS key path (PEM)
    pub tls_key: Option<String>,
    /// Size of each message sent back to clients, in KB
    pub chunk_kb: u32,
    /// Maximum concurrent sessions
    pub max_connections: usize,
    /// Emit diagnostic detail
    pub debug: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8443".to_string(),
            password: DEFAULT_SECRET.to_string(),
            tls_cert: None,
            tls_key: None,
            chunk_kb: 64,
            max_connections: 1000,
            debug: false,
        }
    }
}

impl RelayConfig {
    /// Check every option and freeze the result
    pub fn validate(&self) -> Result<RelaySettings, ConfigError> {
        let listen = self
            .listen
            .parse()
            .map_err(|_| ConfigError::InvalidListenAddress(self.listen.clone()))?;
        let chunk_size = validate_chunk(self.chunk_kb)?;

        let tls = match (&self.tls_cert, &self.tls_key) {
            (Some(cert), Some(key)) => Some((cert.clone(), key.clone())),
            (None, None) => None,
            _ => return Err(ConfigError::IncompleteTls),
        };

        Ok(RelaySettings {
            listen,
            secret: self.password.clone(),
            tls,
            chunk_size,
            max_connections: self.max_connections.max(1),
            debug: self.debug,
        })
    }
}

/// Validated relay server settings
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub listen: std::net::SocketAddr,
    pub secret: String,
    /// Certificate and key paths
    pub tls: Option<(String, String)>,
    pub chunk_size: usize,
    pub max_connections: usize,
    pub debug: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level used when debug is off (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (pretty, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// Relay endpoint, parsed from `host[:port][/path]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayAddress {
    pub host: String,
    pub port: Option<u16>,
    pub path: String,
}

impl RelayAddress {
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidRelayAddress(input.to_string());

        let (authority, path) = match input.find('/') {
            Some(idx) => (&input[..idx], &input[idx..]),
            None => (input, "/"),
        };

        let (host, port) = match authority.split_once(':') {
            Some((host, port)) => {
                if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(invalid());
                }
                let port: u16 = port.parse().map_err(|_| invalid())?;
                if port == 0 {
                    return Err(invalid());
                }
                (host, Some(port))
            }
            None => (authority, None),
        };

        let host_ok = !host.is_empty()
            && host
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'-');
        if !host_ok {
            return Err(invalid());
        }

        Ok(Self {
            host: host.to_string(),
            port,
            path: path.to_string(),
        })
    }

    /// Port to dial, 443 unless given
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_RELAY_PORT)
    }

    /// `host:port` for the TCP dial
    pub fn dial_addr(&self) -> String {
        format!("{}:{}", self.host, self.port())
    }

    /// Websocket URL used in the upgrade request
    pub fn url(&self) -> String {
        match self.port {
            Some(port) => format!("wss://{}:{}{}", self.host, port, self.path),
            None => format!("wss://{}{}", self.host, self.path),
        }
    }
}

impl fmt::Display for RelayAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url())
    }
}

fn validate_port(port: u32) -> Result<u16, ConfigError> {
    match u16::try_from(port) {
        Ok(p) if p >= 1 => Ok(p),
        _ => Err(ConfigError::PortOutOfRange(port)),
    }
}

fn validate_chunk(kb: u32) -> Result<usize, ConfigError> {
    if !(MIN_CHUNK_KB..=MAX_CHUNK_KB).contains(&kb) {
        return Err(ConfigError::ChunkOutOfRange(kb));
    }
    Ok(kb as usize * 1024)
}

/// Generate example configuration
pub fn generate_example_config() -> Config {
    Config {
        proxy: Some(ProxyConfig {
            relay: "relay.example.com/ws".to_string(),
            ..ProxyConfig::default()
        }),
        relay: Some(RelayConfig::default()),
        logging: LoggingConfig::default(),
    }
}
