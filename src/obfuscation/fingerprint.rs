//! TLS Fingerprint Mimicry
//!
//! Configures the relay TLS connection to look like a real browser opening
//! a websocket, and varies the browser from one connection to the next.
//!
//! ## How Fingerprinting Works
//!
//! Passive classifiers (JA3/JA4) key on the shape of the ClientHello:
//! - Cipher suite order
//! - Supported groups (curves)
//! - ALPN protocols
//!
//! A single static shape is trivially matched, so [`BrowserProfile::Random`]
//! draws a fresh concrete profile for every dial.
//!
//! ## Limitations
//!
//! rustls doesn't provide full control over ClientHello construction
//! (extension order, GREASE). This module varies what rustls lets us vary.

use ring::rand::{SecureRandom, SystemRandom};
use rustls::crypto::ring as ring_provider;
use rustls::crypto::CryptoProvider;
use rustls::{ClientConfig, RootCertStore, SupportedCipherSuite};
use std::sync::Arc;

/// Browser fingerprint profiles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BrowserProfile {
    /// Chrome 120+ on Windows/Mac/Linux
    Chrome,
    /// Firefox 121+ on Windows/Mac/Linux
    Firefox,
    /// Safari 17+ on macOS
    Safari,
    /// Microsoft Edge (Chromium-based)
    Edge,
    /// iOS Safari
    IosSafari,
    /// Android Chrome
    AndroidChrome,
    /// Fresh random selection on every connection
    #[default]
    Random,
}

/// Concrete profiles `Random` draws from
const CONCRETE_PROFILES: [BrowserProfile; 6] = [
    BrowserProfile::Chrome,
    BrowserProfile::Firefox,
    BrowserProfile::Safari,
    BrowserProfile::Edge,
    BrowserProfile::IosSafari,
    BrowserProfile::AndroidChrome,
];

/// Map a random byte onto `CONCRETE_PROFILES`, rejecting the uneven tail
fn profile_index(byte: u8) -> Option<usize> {
    let n = CONCRETE_PROFILES.len();
    let limit = 256 - 256 % n;
    let value = byte as usize;
    (value < limit).then_some(value % n)
}

impl BrowserProfile {
    /// Get a random concrete profile
    pub fn random() -> Self {
        let rng = SystemRandom::new();
        let mut buf = [0u8; 1];
        loop {
            if rng.fill(&mut buf).is_err() {
                return Self::Chrome;
            }
            if let Some(index) = profile_index(buf[0]) {
                return CONCRETE_PROFILES[index];
            }
        }
    }

    /// Parse a profile name as accepted on the command line
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "chrome" => Some(Self::Chrome),
            "firefox" => Some(Self::Firefox),
            "safari" => Some(Self::Safari),
            "edge" => Some(Self::Edge),
            "ios" | "ios_safari" => Some(Self::IosSafari),
            "android" | "android_chrome" => Some(Self::AndroidChrome),
            "random" => Some(Self::Random),
            _ => None,
        }
    }

    /// Resolve `Random` into a concrete profile; concrete profiles are returned as-is
    pub fn resolve(self) -> Self {
        match self {
            Self::Random => Self::random(),
            p => p,
        }
    }

    /// Get the User-Agent string for this profile
    pub fn user_agent(&self) -> &'static str {
        match self {
            Self::Chrome => {
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
            }
            Self::Edge => {
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0"
            }
            Self::Firefox => {
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0"
            }
            Self::Safari => {
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_2) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15"
            }
            Self::IosSafari => {
                "Mozilla/5.0 (iPhone; CPU iPhone OS 17_2 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Mobile/15E148 Safari/604.1"
            }
            Self::AndroidChrome => {
                "Mozilla/5.0 (Linux; Android 14) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Mobile Safari/537.36"
            }
            Self::Random => Self::random().user_agent(),
        }
    }

    /// ALPN offered on a websocket connection.
    ///
    /// Browsers only offer `http/1.1` when opening a websocket; an `h2`
    /// offer could be selected by the relay and break the upgrade.
    pub fn alpn_protocols(&self) -> Vec<Vec<u8>> {
        vec![b"http/1.1".to_vec()]
    }
}

/// TLS fingerprint configuration
#[derive(Debug, Clone)]
pub struct FingerprintConfig {
    /// Browser profile to mimic
    pub profile: BrowserProfile,
    /// Trust anchors used to verify the relay
    pub roots: Arc<RootCertStore>,
}

impl FingerprintConfig {
    /// Create a fingerprint config verifying against the bundled web PKI roots
    pub fn new(profile: BrowserProfile) -> Self {
        Self::with_roots(profile, Arc::new(webpki_root_store()))
    }

    /// Create a fingerprint config verifying against caller-supplied roots
    pub fn with_roots(profile: BrowserProfile, roots: Arc<RootCertStore>) -> Self {
        Self { profile, roots }
    }
}

/// Root store built from `webpki-roots`
pub fn webpki_root_store() -> RootCertStore {
    RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    }
}

/// Build a rustls ClientConfig that mimics a browser fingerprint.
///
/// `Random` is resolved here, so every call may produce a different shape.
/// The profile actually used is returned alongside the config.
pub fn build_tls_config(
    config: &FingerprintConfig,
) -> Result<(ClientConfig, BrowserProfile), FingerprintError> {
    let profile = config.profile.resolve();

    // Create crypto provider with specific cipher suite order
    let crypto_provider = CryptoProvider {
        cipher_suites: get_cipher_suites(profile),
        ..ring_provider::default_provider()
    };

    let mut tls_config = ClientConfig::builder_with_provider(Arc::new(crypto_provider))
        .with_safe_default_protocol_versions()
        .map_err(|e| FingerprintError::Config(e.to_string()))?
        .with_root_certificates(config.roots.clone())
        .with_no_client_auth();

    tls_config.alpn_protocols = profile.alpn_protocols();

    Ok((tls_config, profile))
}

/// Get cipher suites ordered to match browser profile
fn get_cipher_suites(profile: BrowserProfile) -> Vec<SupportedCipherSuite> {
    use rustls::crypto::ring::cipher_suite;

    match profile {
        BrowserProfile::Chrome | BrowserProfile::Edge | BrowserProfile::AndroidChrome => {
            // Chrome cipher suite order (TLS 1.3 first, then 1.2)
            vec![
                cipher_suite::TLS13_AES_128_GCM_SHA256,
                cipher_suite::TLS13_AES_256_GCM_SHA384,
                cipher_suite::TLS13_CHACHA20_POLY1305_SHA256,
                cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
                cipher_suite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
                cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
                cipher_suite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
                cipher_suite::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256,
                cipher_suite::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
            ]
        }
        BrowserProfile::Firefox => {
            vec![
                cipher_suite::TLS13_AES_128_GCM_SHA256,
                cipher_suite::TLS13_CHACHA20_POLY1305_SHA256,
                cipher_suite::TLS13_AES_256_GCM_SHA384,
                cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
                cipher_suite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
                cipher_suite::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256,
                cipher_suite::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
                cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
                cipher_suite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
            ]
        }
        BrowserProfile::Safari | BrowserProfile::IosSafari => {
            vec![
                cipher_suite::TLS13_AES_128_GCM_SHA256,
                cipher_suite::TLS13_AES_256_GCM_SHA384,
                cipher_suite::TLS13_CHACHA20_POLY1305_SHA256,
                cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
                cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
                cipher_suite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
                cipher_suite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
                cipher_suite::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256,
                cipher_suite::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
            ]
        }
        BrowserProfile::Random => get_cipher_suites(BrowserProfile::random()),
    }
}

/// Fingerprint-related errors
#[derive(Debug, thiserror::Error)]
pub enum FingerprintError {
    #[error("TLS configuration error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_chrome_config() {
        let config = FingerprintConfig::new(BrowserProfile::Chrome);
        let (tls_config, profile) = build_tls_config(&config).unwrap();

        assert_eq!(profile, BrowserProfile::Chrome);
        assert_eq!(tls_config.alpn_protocols, vec![b"http/1.1".to_vec()]);
    }

    #[test]
    fn test_random_resolves_to_concrete() {
        let config = FingerprintConfig::new(BrowserProfile::Random);
        for _ in 0..32 {
            let (_, profile) = build_tls_config(&config).unwrap();
            assert_ne!(profile, BrowserProfile::Random);
            assert!(CONCRETE_PROFILES.contains(&profile));
        }
    }

    #[test]
    fn test_random_varies() {
        let seen: std::collections::HashSet<_> =
            (0..200).map(|_| BrowserProfile::random()).collect();
        assert!(seen.len() > 1, "random profile never changed");
    }

    #[test]
    fn test_profile_index_uniform() {
        let mut counts = [0usize; 6];
        for byte in 0..=u8::MAX {
            if let Some(index) = profile_index(byte) {
                counts[index] += 1;
            }
        }
        assert!(counts.iter().all(|&c| c == counts[0]), "{:?}", counts);
        assert_eq!(profile_index(251), Some(5));
        assert_eq!(profile_index(252), None);
        assert_eq!(profile_index(255), None);
    }

    #[test]
    fn test_suite_orders_differ() {
        let chrome = get_cipher_suites(BrowserProfile::Chrome);
        let firefox = get_cipher_suites(BrowserProfile::Firefox);
        let safari = get_cipher_suites(BrowserProfile::Safari);

        assert_ne!(
            chrome.iter().map(|s| s.suite()).collect::<Vec<_>>(),
            firefox.iter().map(|s| s.suite()).collect::<Vec<_>>()
        );
        assert_ne!(
            chrome.iter().map(|s| s.suite()).collect::<Vec<_>>(),
            safari.iter().map(|s| s.suite()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_from_name() {
        assert_eq!(BrowserProfile::from_name("Firefox"), Some(BrowserProfile::Firefox));
        assert_eq!(BrowserProfile::from_name("ios"), Some(BrowserProfile::IosSafari));
        assert_eq!(BrowserProfile::from_name("random"), Some(BrowserProfile::Random));
        assert_eq!(BrowserProfile::from_name("lynx"), None);
    }

    #[test]
    fn test_user_agents() {
        assert!(BrowserProfile::Chrome.user_agent().contains("Chrome"));
        assert!(BrowserProfile::Edge.user_agent().contains("Edg/"));
        assert!(BrowserProfile::Firefox.user_agent().contains("Firefox"));
        assert!(BrowserProfile::Safari.user_agent().contains("Safari"));
    }
}
