//! WSS Tunnel Proxy
//!
//! Local HTTP CONNECT proxy that:
//! - Answers CONNECT with a synthetic success line
//! - Dials the relay with a randomized browser TLS fingerprint
//! - Negotiates a websocket tunnel carrying the destination and secret
//! - Relays raw bytes until either side closes

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::info;
use wss_tunnel::{
    config::{generate_example_config, Config},
    logging,
    proxy::{ClientStream, HttpProxyServer},
    TunnelClient,
};

/// WSS Tunnel Proxy - CONNECT proxy over a disguised websocket tunnel
#[derive(Parser, Debug)]
#[command(name = "wss-proxy")]
#[command(about = "WSS Tunnel Proxy - CONNECT proxy over a disguised websocket tunnel")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<String>,

    /// Write an example configuration file and exit
    #[arg(long, value_name = "PATH")]
    generate_config: Option<String>,

    /// Local proxy port (1-65535, default 8080)
    #[arg(long)]
    port: Option<u32>,

    /// Shared secret presented to the relay
    #[arg(long, env = "WSS_PASSWORD", hide_env_values = true)]
    pwd: Option<String>,

    /// Relay address, host[:port][/path]
    #[arg(long)]
    wss: Option<String>,

    /// Outbound message size in KB (1-1024, default 64)
    #[arg(long)]
    chunk: Option<u32>,

    /// TLS fingerprint profile (random, chrome, firefox, safari, edge, ios, android)
    #[arg(long)]
    profile: Option<String>,

    /// Emit per-session diagnostics
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Some(path) = &args.generate_config {
        generate_example_config()
            .save(path)
            .context("Failed to write example configuration")?;
        println!("Example configuration written to {}", path);
        return Ok(());
    }

    // Load configuration; flags override file values
    let config = match &args.config {
        Some(path) => Config::load(path).context("Failed to load configuration")?,
        None => Config::default(),
    };

    let mut proxy_config = config.proxy.clone().unwrap_or_default();
    if let Some(port) = args.port {
        proxy_config.port = port;
    }
    if let Some(pwd) = args.pwd {
        proxy_config.password = pwd;
    }
    if let Some(wss) = args.wss {
        proxy_config.relay = wss;
    }
    if let Some(chunk) = args.chunk {
        proxy_config.chunk_kb = chunk;
    }
    if let Some(profile) = args.profile {
        proxy_config.tls_profile = profile;
    }
    proxy_config.debug |= args.debug;

    // Nothing is bound until every option checks out
    let settings = proxy_config.validate().context("Invalid configuration")?;

    logging::init(settings.debug, &config.logging);

    info!("WSS Tunnel Proxy v{}", wss_tunnel::VERSION);
    info!("Relay: {}", settings.relay.url());
    info!("TLS profile: {:?}", settings.profile);
    info!("Chunk size: {} KB", settings.chunk_size / 1024);

    let client = Arc::new(TunnelClient::new(&settings));

    let server = HttpProxyServer::bind(&format!("0.0.0.0:{}", settings.listen_port))
        .await
        .context("Failed to bind proxy listener")?;

    let handler = move |stream: ClientStream, target: String| {
        let client = Arc::clone(&client);
        async move { client.serve(stream, &target).await }
    };

    tokio::select! {
        result = server.run(handler) => {
            result.context("Proxy server failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
        }
    }

    Ok(())
}
