mod http;
mod server;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use chatrelay_cluster::RegionNode;
use chatrelay_core::{bootstrap::load_config, logging};

use server::ChatRelayServer;

/// Cross-region chat relay
#[derive(Debug, Parser)]
#[command(name = "chatrelay", version, about)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(long, short = 'c')]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Load and validate configuration
    let config = load_config(cli.config.as_deref())?;

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("chatrelay starting...");
    info!("Region: {}", config.region.name);
    info!("HTTP address: {}", config.http_address());

    // 3. Start the region: registry, relay, dispatcher, background tasks
    let node = RegionNode::from_config(&config)
        .await
        .context("Failed to start region node")?;

    // 4. Serve the transport hooks until shutdown
    ChatRelayServer::new(config, node).start().await
}
