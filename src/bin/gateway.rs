//! CLI driver for the Deribit trading gateway.
//!
//! Loads configuration, authenticates, spawns every subsystem, and
//! blocks until interrupted. Exit code `1` covers any fatal
//! initialization failure — bad config, a failed handshake, or a
//! listener that can't bind; `0` is a normal shutdown.

use anyhow::{Context, Result};
use clap::Parser;
use deribit_gateway::config::GatewayConfig;
use deribit_gateway::wiring::Gateway;
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "deribit-gateway", about = "Client-side Deribit derivatives trading gateway")]
struct Args {
    /// Path to the YAML config file. Defaults to $GATEWAY_CONFIG_PATH,
    /// falling back to config.yaml.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides the fan-out server's listen port from the config file.
    #[arg(long)]
    port: Option<u16>,
}

/// Returning `Err` here exits the process with code 1 (fatal
/// initialization failure — bad config, a rejected handshake, or a
/// listener that can't bind); a clean shutdown falls through to `Ok(())`
/// and exit code 0.
#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args.config.unwrap_or_else(GatewayConfig::path_from_env);
    let mut config = GatewayConfig::load(&config_path)
        .with_context(|| format!("failed to load configuration from {}", config_path.display()))?;

    if let Some(port) = args.port {
        config.listen_port = port;
    }

    init_tracing(&config.log_level);
    info!(config_path = %config_path.display(), port = config.listen_port, "starting gateway");

    let gateway = Gateway::start(&config).await.context("fatal initialization failure")?;

    wait_for_shutdown_signal().await;
    info!("shutdown signal received");
    gateway.shutdown();
    Ok(())
}

fn init_tracing(log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn wait_for_shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(%err, "failed to listen for shutdown signal, exiting anyway");
    }
}
