//! Tradedesk server: chat-native paper-trading desk.
//!
//! Serves the chat platform's slash commands, modal interactions and
//! event callbacks over HTTP, routes orders to the paper broker or the
//! local simulator, and evaluates risk alerts against every executed
//! trade.
//!
//! # Usage
//! ```sh
//! BIND_ADDR=0.0.0.0:8080 cargo run
//! ```
//!
//! Configuration comes from the process environment (and a `.env` file
//! when present); see `config::Config::from_env` for the key list.

use anyhow::Result;
use tracing::{Level, info};
use tracing_subscriber::prelude::*;
use tradedesk::application::system::Application;
use tradedesk::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false).pretty();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    info!("Tradedesk {} starting...", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    info!(
        "Configuration loaded: broker_enabled={}, use_real_trading={}, bind={}",
        config.broker_enabled, config.use_real_trading, config.bind_addr
    );

    let bind_addr = config.bind_addr.clone();
    let app = Application::build(config).await?;
    app.start();

    let http = app.http_router();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Listening on {}. Press Ctrl+C to shutdown.", bind_addr);

    axum::serve(listener, http)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received. Exiting...");
        })
        .await?;

    Ok(())
}
