pub mod notify;
pub mod scan;
pub mod symbols;

use anyhow::{Context, Result};
use signal_scanner::Config;
use std::sync::Arc;
use std::time::Duration;

use signal_scanner::exchange::{build_source, MarketDataSource};

/// Load `.env`, the JSON config and environment overrides
pub fn load_config(path: &str) -> Result<Config> {
    dotenv::dotenv().ok();
    Config::from_file(path).with_context(|| format!("Failed to load config from {}", path))
}

pub fn market_source(config: &Config) -> Result<Arc<dyn MarketDataSource>> {
    build_source(
        config.exchange.venue,
        config.exchange.base_url.as_deref(),
        Duration::from_secs(config.exchange.timeout_secs),
    )
    .context("Failed to create exchange client")
}

pub fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")
}
