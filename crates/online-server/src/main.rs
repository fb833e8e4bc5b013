//! # Online Server
//!
//! HTTP presence service: "has this identifier been active recently?"
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings (Redis on localhost)
//! online
//!
//! # Run with a specific config file
//! ONLINE_CONFIG=/path/to/online.toml online
//!
//! # Run with environment variables
//! ONLINE_PORT=8080 ONLINE_STORE__BACKEND=memory ONLINE_TRACKER__WINDOW_SECS=120 online
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
                .unwrap_or_else(|_| "online=debug,online_core=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = match std::env::var("ONLINE_CONFIG") {
        Ok(path) => config::Config::from_file(path)?,
        Err(_) => config::Config::load()?,
    };

    tracing::info!("Starting presence server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
