//! Coinos gateway daemon

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use coinos_gateway::database::MemoryKVStore;
use coinos_gateway::order::MemoryOrderStore;
use coinos_gateway::server::create_router;
use coinos_gateway::{CoinosGateway, GatewayConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "coinos-gatewayd", version, about = "Coinos Lightning payment gateway")]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long, env = "COINOS_GATEWAY_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on, overrides the config file
    #[arg(short, long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => GatewayConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => GatewayConfig::default(),
    };
    let mut config = config.from_env();
    if let Some(listen) = cli.listen {
        config.listen_addr = listen;
    }
    config.validate().context("invalid configuration")?;

    let addr = config.listen_addr()?;

    let gateway = CoinosGateway::new(
        config,
        Arc::new(MemoryKVStore::new()),
        Arc::new(MemoryOrderStore::new()),
    )?;
    let router = create_router(gateway);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!("Listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
