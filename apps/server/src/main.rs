//! Metaproxy Server - headless host for the loopback ICY metadata proxy.
//!
//! Starts a proxy, prints the tunnel URL for an origin stream, and logs each
//! "now playing" update until interrupted. Point any media player at the
//! printed URL to hear the stream without the interleaved metadata.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use metaproxy_core::{BindPreference, IcyMetadata, MetaStreamProxy, MetadataListener};
use tokio::signal;

use crate::config::{parse_bind, ServerConfig};

/// Metaproxy Server - strips ICY metadata from internet radio streams.
#[derive(Parser, Debug)]
#[command(name = "metaproxy-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Origin stream URL to print a tunnel URL for (overrides config file).
    #[arg(env = "METAPROXY_ORIGIN")]
    origin: Option<String>,

    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "METAPROXY_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Loopback stack: auto, ipv4 or ipv6 (overrides config file).
    #[arg(short, long, value_parser = parse_bind)]
    bind: Option<BindPreference>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Metaproxy Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Apply CLI overrides
    if let Some(origin) = args.origin {
        config.origin = Some(origin);
    }
    if let Some(bind) = args.bind {
        config.bind = bind;
    }

    log::info!(
        "Configuration: bind={:?}, connect_timeout={}s, read_timeout={}s",
        config.bind,
        config.connect_timeout_secs,
        config.read_timeout_secs
    );

    let proxy = MetaStreamProxy::start(config.to_proxy_config(), now_playing_listener())
        .context("Failed to start proxy")?;

    match config.origin.as_deref() {
        Some(origin) => {
            let url = proxy.tunnel_url(origin);
            log::info!("Tunneling {}", origin);
            println!("{url}");
        }
        None => log::info!(
            "Proxy listening on port {}; no origin configured, pass one to get a tunnel URL",
            proxy.port()
        ),
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    log::info!("Shutdown signal received, cleaning up...");
    proxy.stop().await;

    log::info!("Shutdown complete");
    Ok(())
}

/// Logs the stream title of each delivered metadata block.
fn now_playing_listener() -> Arc<dyn MetadataListener> {
    Arc::new(|text: &str| {
        let metadata = IcyMetadata::parse(text);
        match metadata.artist_and_title() {
            (Some(artist), Some(title)) => log::info!("Now playing: {} - {}", artist, title),
            (None, Some(title)) | (Some(title), None) => log::info!("Now playing: {}", title),
            (None, None) => log::debug!("Metadata without stream title: {:?}", text),
        }
    })
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
