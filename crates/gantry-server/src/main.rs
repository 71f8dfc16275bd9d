//! Main entry point for the gantry server.

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use gantry_server::{AppConfig, Cli, logging, shutdown};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(&cli)?;
    logging::init_logging(&config.log)?;
    info!(
        "Starting gantry-server {} as {}",
        env!("CARGO_PKG_VERSION"),
        config.instance_name
    );

    let root = CancellationToken::new();
    let signals = shutdown::spawn_signal_handler(root.clone());

    let result = gantry_server::run(config, root.clone()).await;
    root.cancel();
    let _ = signals.await;

    match &result {
        Ok(()) => info!("Shutdown complete"),
        Err(e) => error!("gantry-server stopped with error: {:#}", e),
    }
    result
}
