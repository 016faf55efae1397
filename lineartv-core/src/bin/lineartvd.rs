use std::path::PathBuf;
use std::process;

use clap::Parser;
use tracing::{error, info};

use lineartv_core::{load_lineartv_config, ChannelRegistry};

/// Runs every cataloged channel until interrupted.
#[derive(Parser, Debug)]
#[command(author, version, about = "LinearTV playout daemon", long_about = None)]
struct Cli {
    /// Path to the main lineartv.toml
    #[arg(long, default_value = "configs/lineartv.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match load_lineartv_config(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "failed to load configuration");
            process::exit(1);
        }
    };

    let registry = match ChannelRegistry::new(config) {
        Ok(registry) => registry,
        Err(err) => {
            error!(error = %err, "failed to open channel catalog");
            process::exit(1);
        }
    };

    let channels = registry.catalog().channel_ids();
    if channels.is_empty() {
        info!("no channels registered yet; waiting for the catalog to fill");
    }
    for id in channels {
        let name = registry
            .catalog()
            .channel(&id)
            .map(|record| record.name)
            .unwrap_or_else(|| id.clone());
        if let Err(err) = registry.init(&id, &name).await {
            error!(channel = %id, error = %err, "channel failed to initialize");
        }
    }

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to wait for shutdown signal");
    }
    info!("shutting down channels");
    registry.shutdown().await;
}
