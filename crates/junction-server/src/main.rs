//! # Junction Server
//!
//! WAMP router server.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! junction
//!
//! # Run with custom config
//! JUNCTION_CONFIG=/path/to/junction.toml junction
//!
//! # Run with environment variables
//! JUNCTION__PORT=8080 JUNCTION__HOST=0.0.0.0 junction
//! ```

mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "junction=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!("Starting Junction server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
