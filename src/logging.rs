//! Diagnostic log sink
//!
//! Installed at most once per process. Later calls are no-ops, so library
//! users and tests can call [`init`] freely.

use crate::config::LoggingConfig;
use std::sync::Once;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Install the global subscriber, writing to stderr.
///
/// With `debug` set everything at debug level and above is emitted;
/// otherwise `RUST_LOG` wins over the configured level.
pub fn init(debug: bool, config: &LoggingConfig) {
    INIT.call_once(|| {
        let filter = if debug {
            EnvFilter::new(directive(true, config))
        } else {
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(directive(false, config)))
        };

        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr);

        let installed = match config.format.as_str() {
            "compact" => builder.compact().try_init(),
            _ => builder.pretty().try_init(),
        };

        // Someone else installed a subscriber first; keep theirs
        if let Err(e) = installed {
            eprintln!("logging already initialized: {}", e);
        }
    });
}

fn directive(debug: bool, config: &LoggingConfig) -> &str {
    if debug {
        "debug"
    } else {
        config.level.as_str()
    }
}
