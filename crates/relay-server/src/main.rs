//! # dirc relay
//!
//! Real-time chat relay server.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! dirc-relay
//!
//! # Run with a specific config file
//! RELAY_CONFIG=/path/to/relay.toml dirc-relay
//!
//! # Run with environment variables
//! RELAY_PORT=8083 RELAY_AUTH_URL=http://localhost:7001 dirc-relay
//! ```

use anyhow::Result;
use dirc_relay::{config, handlers, metrics};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "dirc_relay=debug,dirc_relay_core=debug,dirc_relay_protocol=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!("Starting dirc relay on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
