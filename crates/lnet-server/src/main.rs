//! LNET relay server.
//!
//! Accepts LNET client connections and relays stanzas between them by name.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use lnet_relay::RelayServer;
use tracing::info;

mod config;
mod telemetry;

use config::Config;

/// LNET relay server
#[derive(Debug, Parser)]
#[command(name = "lnet-server")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Address to listen on (default: localhost:9999)
    #[arg(long, value_name = "HOST:PORT")]
    server: Option<String>,

    /// Trace raw frames in both directions
    #[arg(long)]
    debug: bool,

    /// TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init()?;

    info!("LNET relay starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = Config::load(cli.config.as_deref())?.with_flags(cli.server, cli.debug);
    config.log_config();

    let server = RelayServer::bind(config.to_server_config()?)
        .await
        .with_context(|| format!("Failed to listen on {}", config.listen))?;

    server
        .run_until(shutdown_signal())
        .await
        .context("Relay server failed")?;

    info!("LNET relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
