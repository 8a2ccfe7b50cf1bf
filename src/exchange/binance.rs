//! Binance-style spot REST client (Binance and MEXC v3)
//!
//! Both venues expose the same `/api/v3` shapes: `exchangeInfo`, `klines`
//! arrays and `depth`. They differ only in interval codes and in how a
//! tradable status is spelled. No API key required.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::{get_json, http_client, parse_f64, parse_levels, parse_millis, MarketDataSource, SourceError};
use crate::types::{Candle, Interval, OrderBookSnapshot, Symbol};

pub const BINANCE_API_BASE: &str = "https://api.binance.com";
pub const MEXC_API_BASE: &str = "https://api.mexc.com";

/// Maximum klines per request
const MAX_KLINES_PER_REQUEST: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dialect {
    Binance,
    Mexc,
}

impl Dialect {
    fn interval_code(&self, interval: Interval) -> Option<&'static str> {
        match self {
            Dialect::Binance => Some(interval.as_str()),
            Dialect::Mexc => match interval {
                Interval::M1 => Some("1m"),
                Interval::M5 => Some("5m"),
                Interval::M15 => Some("15m"),
                Interval::M30 => Some("30m"),
                Interval::H1 => Some("60m"),
                Interval::H4 => Some("4h"),
                Interval::D1 => Some("1d"),
                _ => None,
            },
        }
    }

    fn is_trading(&self, status: &Value) -> bool {
        match status {
            Value::String(s) => matches!(s.as_str(), "TRADING" | "ENABLED" | "1"),
            Value::Number(n) => n.as_i64() == Some(1),
            // Some MEXC listings omit status entirely
            Value::Null => *self == Dialect::Mexc,
            _ => false,
        }
    }
}

/// Whether MEXC has a kline interval code for `interval`
pub(crate) fn mexc_supports(interval: Interval) -> bool {
    Dialect::Mexc.interval_code(interval).is_some()
}

/// Kline row from the `/api/v3/klines` endpoint
///
/// API returns an array: [open_time, open, high, low, close, volume, close_time, ...].
/// Binance sends prices as strings; MEXC may send numbers.
#[derive(Debug, Clone)]
pub struct RawKline {
    pub candle: Candle,
}

impl RawKline {
    /// Parse from raw JSON array
    pub fn from_raw(raw: &[Value]) -> Option<Self> {
        if raw.len() < 6 {
            return None;
        }

        Some(RawKline {
            candle: Candle {
                open_time: parse_millis(&raw[0])?,
                open: parse_f64(&raw[1])?,
                high: parse_f64(&raw[2])?,
                low: parse_f64(&raw[3])?,
                close: parse_f64(&raw[4])?,
                volume: parse_f64(&raw[5])?,
            },
        })
    }
}

/// Binance/MEXC market data client
#[derive(Debug, Clone)]
pub struct BinanceClient {
    client: Client,
    base_url: String,
    dialect: Dialect,
}

impl BinanceClient {
    /// Binance spot client against `base_url`
    pub fn binance(base_url: &str, timeout: Duration) -> Result<Self, SourceError> {
        Self::with_dialect(base_url, timeout, Dialect::Binance)
    }

    /// MEXC spot client against `base_url`
    pub fn mexc(base_url: &str, timeout: Duration) -> Result<Self, SourceError> {
        Self::with_dialect(base_url, timeout, Dialect::Mexc)
    }

    fn with_dialect(base_url: &str, timeout: Duration, dialect: Dialect) -> Result<Self, SourceError> {
        Ok(BinanceClient {
            client: http_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            dialect,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v3/{}", self.base_url, path)
    }
}

#[async_trait]
impl MarketDataSource for BinanceClient {
    fn name(&self) -> &'static str {
        match self.dialect {
            Dialect::Binance => "binance",
            Dialect::Mexc => "mexc",
        }
    }

    async fn list_symbols(&self, quote_asset: &str) -> Result<Vec<Symbol>, SourceError> {
        let body = get_json(&self.client, &self.url("exchangeInfo"), &[]).await?;

        let listings = body
            .get("symbols")
            .and_then(Value::as_array)
            .ok_or_else(|| SourceError::Malformed("exchangeInfo without symbols".into()))?;

        let symbols: Vec<Symbol> = listings
            .iter()
            .filter(|s| {
                s.get("quoteAsset")
                    .and_then(Value::as_str)
                    .is_some_and(|q| q.eq_ignore_ascii_case(quote_asset))
            })
            .filter(|s| self.dialect.is_trading(s.get("status").unwrap_or(&Value::Null)))
            .filter_map(|s| s.get("symbol").and_then(Value::as_str))
            .map(Symbol::new)
            .collect();

        debug!(venue = self.name(), count = symbols.len(), quote_asset, "listed symbols");
        Ok(symbols)
    }

    async fn candles(
        &self,
        symbol: &Symbol,
        interval: Interval,
        limit: u32,
    ) -> Result<Vec<Candle>, SourceError> {
        let code = self
            .dialect
            .interval_code(interval)
            .ok_or(SourceError::UnsupportedInterval(interval))?;
        let limit = limit.clamp(1, MAX_KLINES_PER_REQUEST);

        let params = [
            ("symbol", symbol.to_string()),
            ("interval", code.to_string()),
            ("limit", limit.to_string()),
        ];
        let body = get_json(&self.client, &self.url("klines"), &params).await?;

        let rows = body
            .as_array()
            .ok_or_else(|| SourceError::Malformed("klines response is not an array".into()))?;

        let candles: Vec<Candle> = rows
            .iter()
            .filter_map(|row| row.as_array())
            .filter_map(|row| RawKline::from_raw(row))
            .map(|k| k.candle)
            .collect();

        if candles.len() < rows.len() {
            debug!(
                %symbol,
                dropped = rows.len() - candles.len(),
                "skipped unparsable kline rows"
            );
        }
        Ok(candles)
    }

    async fn order_book(
        &self,
        symbol: &Symbol,
        depth: u32,
    ) -> Result<OrderBookSnapshot, SourceError> {
        let params = [("symbol", symbol.to_string()), ("limit", depth.to_string())];
        let body = get_json(&self.client, &self.url("depth"), &params).await?;

        let side = |key: &str| -> Result<_, SourceError> {
            let value = body
                .get(key)
                .ok_or_else(|| SourceError::Malformed(format!("depth response without {}", key)))?;
            parse_levels(value, depth as usize)
        };

        Ok(OrderBookSnapshot {
            symbol: symbol.clone(),
            timestamp: Utc::now(),
            bids: side("bids")?,
            asks: side("asks")?,
        })
    }
}
