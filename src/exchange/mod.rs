//! Public exchange market data adapters
//!
//! Each venue implements [`MarketDataSource`]; wire formats never leak past
//! this module. Only unauthenticated endpoints are used.
//!
//! # Example
//! ```no_run
//! use signal_scanner::exchange::{build_source, MarketDataSource, Venue};
//! use signal_scanner::{Interval, Symbol};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let source = build_source(Venue::Binance, None, Duration::from_secs(10))?;
//!     let candles = source.candles(&Symbol::new("BTCUSDT"), Interval::H1, 100).await?;
//!     println!("Fetched {} candles", candles.len());
//!     Ok(())
//! }
//! ```

pub mod binance;
pub mod bitget;

pub use binance::BinanceClient;
pub use bitget::BitgetClient;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::common::clip_body;
use crate::types::{BookLevel, Candle, Interval, OrderBookSnapshot, Symbol};

/// Failure talking to an exchange
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("interval {0} not supported by this venue")]
    UnsupportedInterval(Interval),
}

impl SourceError {
    /// Worth retrying: network trouble, throttling, or server-side errors
    pub fn is_transient(&self) -> bool {
        match self {
            SourceError::Transport(_) | SourceError::Timeout => true,
            SourceError::Status { status, .. } => *status == 429 || *status >= 500,
            SourceError::Malformed(_) | SourceError::UnsupportedInterval(_) => false,
        }
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SourceError::Timeout
        } else if err.is_decode() {
            SourceError::Malformed(err.to_string())
        } else {
            SourceError::Transport(err.to_string())
        }
    }
}

/// Read-only market data for one venue
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Tradable symbols quoted in `quote_asset`, in exchange order
    async fn list_symbols(&self, quote_asset: &str) -> Result<Vec<Symbol>, SourceError>;

    /// Most recent `limit` candles, oldest first
    async fn candles(
        &self,
        symbol: &Symbol,
        interval: Interval,
        limit: u32,
    ) -> Result<Vec<Candle>, SourceError>;

    async fn order_book(&self, symbol: &Symbol, depth: u32)
        -> Result<OrderBookSnapshot, SourceError>;
}

/// Supported venues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    #[default]
    Binance,
    Mexc,
    Bitget,
}

impl Venue {
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Venue::Binance => binance::BINANCE_API_BASE,
            Venue::Mexc => binance::MEXC_API_BASE,
            Venue::Bitget => bitget::BITGET_API_BASE,
        }
    }

    /// Whether the venue serves candles at `interval`
    pub fn supports(&self, interval: Interval) -> bool {
        match self {
            Venue::Binance => true,
            Venue::Mexc => binance::mexc_supports(interval),
            Venue::Bitget => bitget::granularity(interval).is_some(),
        }
    }
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Venue::Binance => "binance",
            Venue::Mexc => "mexc",
            Venue::Bitget => "bitget",
        };
        f.write_str(s)
    }
}

impl FromStr for Venue {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "binance" => Ok(Venue::Binance),
            "mexc" => Ok(Venue::Mexc),
            "bitget" => Ok(Venue::Bitget),
            other => Err(format!("unknown venue '{}'", other)),
        }
    }
}

/// Build the adapter for `venue`, optionally pointed at another base URL
pub fn build_source(
    venue: Venue,
    base_url: Option<&str>,
    timeout: Duration,
) -> Result<Arc<dyn MarketDataSource>, SourceError> {
    let base = base_url.unwrap_or(venue.default_base_url());
    let source: Arc<dyn MarketDataSource> = match venue {
        Venue::Binance => Arc::new(BinanceClient::binance(base, timeout)?),
        Venue::Mexc => Arc::new(BinanceClient::mexc(base, timeout)?),
        Venue::Bitget => Arc::new(BitgetClient::new(base, timeout)?),
    };
    Ok(source)
}

// =============================================================================
// Shared wire helpers
// =============================================================================

pub(crate) fn http_client(timeout: Duration) -> Result<Client, SourceError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| SourceError::Transport(format!("failed to create HTTP client: {}", e)))
}

/// GET `url` and decode the body as JSON; non-2xx becomes [`SourceError::Status`]
pub(crate) async fn get_json(
    client: &Client,
    url: &str,
    query: &[(&str, String)],
) -> Result<Value, SourceError> {
    debug!(url, ?query, "GET");

    let response = client.get(url).query(query).send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(SourceError::Status {
            status: status.as_u16(),
            body: clip_body(&body),
        });
    }

    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|e| SourceError::Malformed(e.to_string()))
}

/// Numeric field sent either as a JSON number or a decimal string
pub(crate) fn parse_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Millisecond epoch timestamp sent as a number or a string
pub(crate) fn parse_millis(value: &Value) -> Option<DateTime<Utc>> {
    let millis = match value {
        Value::Number(n) => n.as_i64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    DateTime::from_timestamp_millis(millis)
}

/// `[[price, size], ...]` levels, truncated to `depth`
pub(crate) fn parse_levels(value: &Value, depth: usize) -> Result<Vec<BookLevel>, SourceError> {
    let rows = value
        .as_array()
        .ok_or_else(|| SourceError::Malformed("order book side is not an array".into()))?;

    Ok(rows
        .iter()
        .filter_map(|row| {
            let row = row.as_array()?;
            Some(BookLevel {
                price: parse_f64(row.first()?)?,
                size: parse_f64(row.get(1)?)?,
            })
        })
        .filter(|l| l.price > 0.0 && l.size >= 0.0)
        .take(depth)
        .collect())
}

/// Sort by open time, drop duplicates and candles failing validation
pub fn normalize_candles(mut candles: Vec<Candle>) -> Vec<Candle> {
    let before = candles.len();
    candles.retain(|c| c.validate().is_ok());
    candles.sort_by_key(|c| c.open_time);
    candles.dedup_by_key(|c| c.open_time);

    if candles.len() != before {
        debug!(dropped = before - candles.len(), "normalized candle series");
    }
    candles
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    #[test]
    fn test_transient_classification() {
        assert!(SourceError::Timeout.is_transient());
        assert!(SourceError::Transport("reset".into()).is_transient());
        assert!(SourceError::Status { status: 429, body: String::new() }.is_transient());
        assert!(SourceError::Status { status: 502, body: String::new() }.is_transient());
        assert!(!SourceError::Status { status: 400, body: String::new() }.is_transient());
        assert!(!SourceError::Malformed("x".into()).is_transient());
        assert!(!SourceError::UnsupportedInterval(Interval::H2).is_transient());
    }

    #[test]
    fn test_parse_numbers_and_strings() {
        assert_eq!(parse_f64(&json!("1.25")), Some(1.25));
        assert_eq!(parse_f64(&json!(2)), Some(2.0));
        assert_eq!(parse_f64(&json!(null)), None);
        assert_eq!(parse_f64(&json!("abc")), None);

        let ts = parse_millis(&json!("1700000000000")).unwrap();
        assert_eq!(ts.timestamp(), 1_700_000_000);
        assert_eq!(parse_millis(&json!(1700000000000i64)), Some(ts));
    }

    #[test]
    fn test_parse_levels() {
        let side = json!([["100.5", "2"], [100.0, 3.5], ["bad"], ["99", "1"]]);
        let levels = parse_levels(&side, 2).unwrap();
        assert_eq!(levels.len(), 2);
        assert_eq!(levels[1], BookLevel { price: 100.0, size: 3.5 });
        assert!(parse_levels(&json!({}), 5).is_err());
    }

    #[test]
    fn test_normalize_candles() {
        let t0 = Utc::now();
        let candle = |mins: i64, close: f64| Candle {
            open_time: t0 + ChronoDuration::minutes(mins),
            open: 10.0,
            high: 12.0,
            low: 9.0,
            close,
            volume: 1.0,
        };

        let raw = vec![
            candle(2, 11.0),
            candle(0, 10.0),
            candle(1, 50.0), // close above high
            candle(2, 11.0),
        ];
        let out = normalize_candles(raw);
        assert_eq!(out.len(), 2);
        assert!(out[0].open_time < out[1].open_time);
    }

    #[test]
    fn test_venue_parse() {
        assert_eq!("MEXC".parse::<Venue>().unwrap(), Venue::Mexc);
        assert!("kraken".parse::<Venue>().is_err());
        assert_eq!(Venue::Bitget.to_string(), "bitget");
    }

    #[test]
    fn test_venue_interval_support() {
        assert!(Interval::ALL.iter().all(|i| Venue::Binance.supports(*i)));
        assert!(Venue::Mexc.supports(Interval::H1));
        for interval in [Interval::M3, Interval::H2, Interval::H6, Interval::H12] {
            assert!(!Venue::Mexc.supports(interval), "mexc {}", interval);
        }
        assert!(Venue::Bitget.supports(Interval::H12));
        assert!(!Venue::Bitget.supports(Interval::H2));
    }
}
