//! WSS Tunnel Relay
//!
//! Reference relay that:
//! - Accepts websocket upgrades, optionally over TLS
//! - Checks the shared secret and destination headers
//! - Connects to the destination and relays bytes both ways

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use wss_tunnel::{config::Config, logging, RelayServer};

/// WSS Tunnel Relay - websocket relay endpoint
#[derive(Parser, Debug)]
#[command(name = "wss-relay")]
#[command(about = "WSS Tunnel Relay - websocket relay endpoint")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<String>,

    /// Listen address (overrides config)
    #[arg(short, long)]
    listen: Option<String>,

    /// Shared secret expected from clients
    #[arg(long, env = "PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// TLS certificate chain (PEM)
    #[arg(long, requires = "key")]
    cert: Option<String>,

    /// TLS private key (PEM)
    #[arg(long, requires = "cert")]
    key: Option<String>,

    /// Message size towards clients in KB (1-1024)
    #[arg(long)]
    chunk: Option<u32>,

    /// Maximum concurrent sessions
    #[arg(long)]
    max_connections: Option<usize>,

    /// Emit per-session diagnostics
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load(path).context("Failed to load configuration")?,
        None => Config::default(),
    };

    let mut relay_config = config.relay.clone().unwrap_or_default();
    if let Some(listen) = args.listen {
        relay_config.listen = listen;
    }
    if let Some(password) = args.password {
        relay_config.password = password;
    }
    if args.cert.is_some() {
        relay_config.tls_cert = args.cert;
        relay_config.tls_key = args.key;
    }
    if let Some(chunk) = args.chunk {
        relay_config.chunk_kb = chunk;
    }
    if let Some(max) = args.max_connections {
        relay_config.max_connections = max;
    }
    relay_config.debug |= args.debug;

    let settings = relay_config.validate().context("Invalid configuration")?;

    logging::init(settings.debug, &config.logging);

    info!("WSS Tunnel Relay v{}", wss_tunnel::VERSION);
    info!("Max connections: {}", settings.max_connections);

    let server = RelayServer::bind(&settings)
        .await
        .context("Failed to start relay")?;

    tokio::select! {
        result = server.run() => {
            result.context("Relay server failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
        }
    }

    Ok(())
}
