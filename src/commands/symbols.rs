//! Symbols command - print the resolved symbol universe

use anyhow::{Context, Result};
use std::sync::Arc;

use signal_scanner::{MarketDataFetcher, SymbolCatalog};

pub fn run(config_path: String) -> Result<()> {
    let config = super::load_config(&config_path)?;
    config
        .exchange
        .validate()
        .context("Invalid exchange configuration")?;

    let source = super::market_source(&config)?;
    let fetcher = Arc::new(MarketDataFetcher::new(source, &config.exchange));
    let catalog = SymbolCatalog::new(fetcher, &config.exchange);

    let runtime = super::runtime()?;
    let symbols = runtime
        .block_on(catalog.list_symbols(&config.exchange.quote_asset))
        .context("Failed to list symbols")?;

    println!("\n{}", "=".repeat(60));
    println!(
        "{} SYMBOLS ({} quote)",
        config.exchange.venue.to_string().to_uppercase(),
        config.exchange.quote_asset
    );
    println!("{}", "=".repeat(60));
    for symbol in &symbols {
        println!("  {}", symbol);
    }
    println!("{}", "=".repeat(60));
    println!("  Total: {}", symbols.len());

    Ok(())
}
