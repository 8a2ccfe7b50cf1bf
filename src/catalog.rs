//! Symbol universe discovery

use itertools::Itertools;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::ExchangeConfig;
use crate::error::{ScanError, ScanResult};
use crate::fetcher::MarketDataFetcher;
use crate::types::Symbol;

struct CachedListing {
    quote_asset: String,
    fetched_at: Instant,
    symbols: Vec<Symbol>,
}

/// Resolves which symbols a cycle scans
///
/// An explicit symbol list bypasses discovery. Otherwise the exchange listing
/// is cached for `symbol_refresh_secs`; when a refresh fails the previous
/// listing is reused.
pub struct SymbolCatalog {
    fetcher: Arc<MarketDataFetcher>,
    explicit: Vec<Symbol>,
    exclude: Vec<Symbol>,
    max_symbols: Option<usize>,
    refresh: Duration,
    cache: Mutex<Option<CachedListing>>,
}

impl SymbolCatalog {
    pub fn new(fetcher: Arc<MarketDataFetcher>, config: &ExchangeConfig) -> Self {
        SymbolCatalog {
            fetcher,
            explicit: config.explicit_symbols(),
            exclude: config
                .exclude
                .iter()
                .map(|s| Symbol::new(s.trim().to_uppercase()))
                .collect(),
            max_symbols: config.max_symbols,
            refresh: Duration::from_secs(config.symbol_refresh_secs),
            cache: Mutex::new(None),
        }
    }

    /// Deduplicated symbols in exchange order, after exclusions and cap
    pub async fn list_symbols(&self, quote_asset: &str) -> ScanResult<Vec<Symbol>> {
        if !self.explicit.is_empty() {
            return Ok(self.select(self.explicit.clone()));
        }

        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            if cached.quote_asset == quote_asset && cached.fetched_at.elapsed() < self.refresh {
                return Ok(self.select(cached.symbols.clone()));
            }
        }

        match self.fetcher.list_symbols(quote_asset).await {
            Ok(symbols) => {
                info!(
                    venue = self.fetcher.venue(),
                    quote_asset,
                    count = symbols.len(),
                    "refreshed symbol catalog"
                );
                let selected = self.select(symbols.clone());
                *cache = Some(CachedListing {
                    quote_asset: quote_asset.to_string(),
                    fetched_at: Instant::now(),
                    symbols,
                });
                Ok(selected)
            }
            Err(e) => match cache.as_ref() {
                Some(stale) if stale.quote_asset == quote_asset => {
                    warn!(error = %e, kind = "catalog_unavailable", "symbol refresh failed, using cached listing");
                    Ok(self.select(stale.symbols.clone()))
                }
                _ => Err(ScanError::CatalogUnavailable(e.to_string())),
            },
        }
    }

    fn select(&self, symbols: Vec<Symbol>) -> Vec<Symbol> {
        let selected = symbols
            .into_iter()
            .unique()
            .filter(|s| !self.exclude.contains(s));

        match self.max_symbols {
            Some(cap) => selected.take(cap).collect(),
            None => selected.collect(),
        }
    }
}
