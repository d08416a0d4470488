use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use dotenvy::dotenv;

use tracing::info;

use hls_relay::{AppConfig, Logger, RelayApplicationServer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let config = Arc::new(AppConfig::parse());

    // guards have to live as long as main or buffered logs and sentry events get dropped
    let _guards = Logger::init(&config);

    info!(
        "logger and env prepped, {} mode, origin {}",
        Logger::environment_name(config.cargo_env),
        config.origin_page_template
    );

    RelayApplicationServer::serve(config)
        .await
        .context("relay server failed to start")?;

    Ok(())
}
