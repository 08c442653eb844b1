//! Tradecore Server - headless trading core
//!
//! Runs the ledger engine, the protective stop sweep and the arbitrage
//! scanner until Ctrl+C. Metrics are rendered to the log on shutdown.
//!
//! # Usage
//! ```sh
//! DATABASE_URL=sqlite://data/tradecore.db RUST_LOG=debug cargo run --bin server
//! ```

use anyhow::Result;
use tracing::{Level, info};
use tracing_subscriber::prelude::*;
use tradecore::application::system::Application;
use tradecore::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    info!("Tradecore Server {} starting...", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    info!(
        "Configuration loaded: database={}, in_memory={}, auto_execute={}",
        config.database_url, config.in_memory, config.arbitrage.auto_execute
    );

    let app = Application::build(config).await?;
    let handle = app.start().await?;
    info!("Server running. Press Ctrl+C to shutdown.");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received.");

    let metrics = handle.metrics.clone();
    handle.shutdown().await;
    info!("Final metrics:\n{}", metrics.render());

    Ok(())
}
