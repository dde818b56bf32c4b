//! Airwave Server - standalone radio relay.
//!
//! Serves the relay API over HTTP so HTTPS pages can play plain-HTTP
//! internet radio and poll now-playing metadata.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use airwave_core::{bootstrap_services, generate_token, start_server, AppState, ProxyContext};
use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;

use crate::config::ServerConfig;

/// Airwave Server - streaming radio relay with ICY metadata extraction.
#[derive(Parser, Debug)]
#[command(name = "airwave-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "AIRWAVE_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind port (overrides config file).
    #[arg(short = 'p', long, env = "AIRWAVE_BIND_PORT")]
    port: Option<u16>,

    /// Shared secret for the stream endpoint (overrides config file).
    #[arg(short = 't', long, env = "AIRWAVE_PROXY_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Base URL browsers reach the relay at (overrides config file).
    #[arg(short = 'b', long, env = "AIRWAVE_PUBLIC_BASE_URL")]
    public_base_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Airwave Server v{}", env!("CARGO_PKG_VERSION"));

    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Apply CLI overrides
    if let Some(port) = args.port {
        config.bind_port = port;
    }
    if let Some(token) = args.token {
        config.relay.proxy_token = token;
    }
    if let Some(base) = args.public_base_url {
        config.public_base_url = base;
    }

    if config.relay.proxy_token.trim().is_empty() {
        config.relay.proxy_token = generate_token();
        log::info!("Generated proxy token: {}", config.relay.proxy_token);
    }

    log::info!(
        "Configuration: bind_port={}, public_base_url={}, stations={}",
        config.bind_port,
        if config.public_base_url.is_empty() {
            "(relative)"
        } else {
            &config.public_base_url
        },
        config.stations.len()
    );

    let core_config = config.to_core_config();
    let context = ProxyContext::new(
        &core_config.public_base_url,
        core_config.relay.proxy_token.clone(),
    );
    let services = bootstrap_services(&core_config, context, Arc::new(config.station_store()))
        .context("Failed to bootstrap services")?;

    log::info!("Services bootstrapped successfully");

    let app_state = AppState::builder().services(&services).build();
    let shutdown = services.cancel_token.clone();

    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(app_state, shutdown).await {
            log::error!("Server error: {}", e);
        }
    });

    // Wait for shutdown signal
    shutdown_signal().await;

    log::info!("Shutdown signal received, cleaning up...");

    // Cancelling the shared token ends live relays and stops the server
    services.shutdown().await;

    if let Err(e) = server_handle.await {
        log::warn!("Server task ended abnormally: {}", e);
    }

    log::info!("Shutdown complete");
    Ok(())
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
