//! Market data fetching with timeouts, retries and pacing
//!
//! Wraps a [`MarketDataSource`] so every request is rate limited, bounded by
//! a timeout, and retried with linear backoff on transient failures.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::common::RateLimiter;
use crate::config::ExchangeConfig;
use crate::error::{ScanError, ScanResult};
use crate::exchange::{normalize_candles, MarketDataSource, SourceError};
use crate::types::{Candle, Interval, OrderBookSnapshot, Symbol};

pub const MAX_CANDLE_LIMIT: u32 = 1000;
pub const MAX_BOOK_DEPTH: u32 = 100;

/// Timeout and retry settings
#[derive(Debug, Clone)]
pub struct FetchPolicy {
    /// Per-attempt timeout
    pub timeout: Duration,
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Wait before retry `n` is `backoff * n`
    pub backoff: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        FetchPolicy {
            timeout: Duration::from_secs(10),
            max_attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

impl From<&ExchangeConfig> for FetchPolicy {
    fn from(config: &ExchangeConfig) -> Self {
        FetchPolicy {
            timeout: Duration::from_secs(config.timeout_secs),
            max_attempts: config.max_retries.max(1),
            backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }
}

pub struct MarketDataFetcher {
    source: Arc<dyn MarketDataSource>,
    limiter: RateLimiter,
    policy: FetchPolicy,
}

impl MarketDataFetcher {
    pub fn new(source: Arc<dyn MarketDataSource>, config: &ExchangeConfig) -> Self {
        Self::with_policy(
            source,
            RateLimiter::with_rate(config.rate_limit),
            FetchPolicy::from(config),
        )
    }

    pub fn with_policy(
        source: Arc<dyn MarketDataSource>,
        limiter: RateLimiter,
        policy: FetchPolicy,
    ) -> Self {
        MarketDataFetcher {
            source,
            limiter,
            policy,
        }
    }

    pub fn venue(&self) -> &'static str {
        self.source.name()
    }

    async fn execute_with_retry<F, Fut, T>(&self, what: &'static str, operation: F) -> Result<T, SourceError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let mut attempt = 1;
        loop {
            self.limiter.acquire().await;

            let err = match timeout(self.policy.timeout, operation()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => e,
                Err(_) => SourceError::Timeout,
            };

            if !err.is_transient() || attempt >= self.policy.max_attempts {
                return Err(err);
            }

            let delay = self.policy.backoff * attempt;
            warn!(
                request = what,
                attempt,
                max_attempts = self.policy.max_attempts,
                error = %err,
                "request failed, retrying in {}ms",
                delay.as_millis()
            );
            sleep(delay).await;
            attempt += 1;
        }
    }

    /// Symbol listing, retried like any other request
    pub async fn list_symbols(&self, quote_asset: &str) -> Result<Vec<Symbol>, SourceError> {
        self.execute_with_retry("list_symbols", || self.source.list_symbols(quote_asset))
            .await
    }

    /// Normalized candles, oldest first
    ///
    /// `limit` is clamped to `1..=1000`. Fails with `DataUnavailable` once
    /// retries are exhausted or when nothing valid comes back.
    pub async fn get_candles(
        &self,
        symbol: &Symbol,
        interval: Interval,
        limit: u32,
    ) -> ScanResult<Vec<Candle>> {
        let limit = limit.clamp(1, MAX_CANDLE_LIMIT);

        let raw = self
            .execute_with_retry("candles", || self.source.candles(symbol, interval, limit))
            .await
            .map_err(|e| ScanError::data_unavailable(symbol, &e))?;

        let candles = normalize_candles(raw);
        if candles.is_empty() {
            return Err(ScanError::DataUnavailable {
                symbol: symbol.clone(),
                reason: format!("no valid {} candles", interval),
            });
        }

        debug!(%symbol, %interval, count = candles.len(), "fetched candles");
        Ok(candles)
    }

    /// Order book top levels; `depth` is clamped to `1..=100`
    pub async fn get_order_book(&self, symbol: &Symbol, depth: u32) -> ScanResult<OrderBookSnapshot> {
        let depth = depth.clamp(1, MAX_BOOK_DEPTH);

        self.execute_with_retry("order_book", || self.source.order_book(symbol, depth))
            .await
            .map_err(|e| ScanError::data_unavailable(symbol, &e))
    }
}
