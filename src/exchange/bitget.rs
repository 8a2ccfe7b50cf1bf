//! Bitget USDT-M futures market data (v2 mix API)
//!
//! Every response is wrapped as `{"code": "00000", "msg": ..., "data": ...}`
//! and numeric fields arrive as strings.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::{get_json, http_client, parse_f64, parse_levels, parse_millis, MarketDataSource, SourceError};
use crate::types::{Candle, Interval, OrderBookSnapshot, Symbol};

pub const BITGET_API_BASE: &str = "https://api.bitget.com";

const PRODUCT_TYPE: &str = "USDT-FUTURES";
const SUCCESS_CODE: &str = "00000";
const MAX_CANDLES_PER_REQUEST: u32 = 1000;

/// Bitget granularity code
pub fn granularity(interval: Interval) -> Option<&'static str> {
    match interval {
        Interval::M1 => Some("1m"),
        Interval::M3 => Some("3m"),
        Interval::M5 => Some("5m"),
        Interval::M15 => Some("15m"),
        Interval::M30 => Some("30m"),
        Interval::H1 => Some("1H"),
        Interval::H4 => Some("4H"),
        Interval::H6 => Some("6H"),
        Interval::H12 => Some("12H"),
        Interval::D1 => Some("1D"),
        Interval::H2 => None,
    }
}

/// merge-depth accepts a fixed set of limits
fn depth_limit(depth: u32) -> &'static str {
    match depth {
        0..=1 => "1",
        2..=5 => "5",
        6..=15 => "15",
        16..=50 => "50",
        _ => "max",
    }
}

/// Unwrap the `data` field, rejecting non-success codes
fn into_data(body: Value) -> Result<Value, SourceError> {
    let code = body.get("code").and_then(Value::as_str).unwrap_or(SUCCESS_CODE);
    if code != SUCCESS_CODE {
        let msg = body.get("msg").and_then(Value::as_str).unwrap_or_default();
        return Err(SourceError::Malformed(format!("bitget code {}: {}", code, msg)));
    }
    match body {
        Value::Object(mut map) => map
            .remove("data")
            .ok_or_else(|| SourceError::Malformed("bitget response without data".into())),
        _ => Err(SourceError::Malformed("bitget response is not an object".into())),
    }
}

/// Bitget futures market data client
#[derive(Debug, Clone)]
pub struct BitgetClient {
    client: Client,
    base_url: String,
}

impl BitgetClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SourceError> {
        Ok(BitgetClient {
            client: http_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v2/mix/market/{}", self.base_url, path)
    }
}

#[async_trait]
impl MarketDataSource for BitgetClient {
    fn name(&self) -> &'static str {
        "bitget"
    }

    async fn list_symbols(&self, quote_asset: &str) -> Result<Vec<Symbol>, SourceError> {
        let params = [("productType", PRODUCT_TYPE.to_string())];
        let data = into_data(get_json(&self.client, &self.url("tickers"), &params).await?)?;

        let tickers = data
            .as_array()
            .ok_or_else(|| SourceError::Malformed("tickers data is not an array".into()))?;

        let quote = quote_asset.to_uppercase();
        let symbols: Vec<Symbol> = tickers
            .iter()
            .filter_map(|t| t.get("symbol").and_then(Value::as_str))
            .filter(|s| s.to_uppercase().ends_with(&quote))
            .map(Symbol::new)
            .collect();

        debug!(venue = "bitget", count = symbols.len(), quote_asset, "listed symbols");
        Ok(symbols)
    }

    async fn candles(
        &self,
        symbol: &Symbol,
        interval: Interval,
        limit: u32,
    ) -> Result<Vec<Candle>, SourceError> {
        let code = granularity(interval).ok_or(SourceError::UnsupportedInterval(interval))?;
        let params = [
            ("symbol", symbol.to_string()),
            ("productType", PRODUCT_TYPE.to_string()),
            ("granularity", code.to_string()),
            ("limit", limit.clamp(1, MAX_CANDLES_PER_REQUEST).to_string()),
        ];
        let data = into_data(get_json(&self.client, &self.url("candles"), &params).await?)?;

        let rows = data
            .as_array()
            .ok_or_else(|| SourceError::Malformed("candles data is not an array".into()))?;

        // [ts, open, high, low, close, base_volume, quote_volume]
        Ok(rows
            .iter()
            .filter_map(|row| {
                let row = row.as_array()?;
                if row.len() < 6 {
                    return None;
                }
                Some(Candle {
                    open_time: parse_millis(&row[0])?,
                    open: parse_f64(&row[1])?,
                    high: parse_f64(&row[2])?,
                    low: parse_f64(&row[3])?,
                    close: parse_f64(&row[4])?,
                    volume: parse_f64(&row[5])?,
                })
            })
            .collect())
    }

    async fn order_book(
        &self,
        symbol: &Symbol,
        depth: u32,
    ) -> Result<OrderBookSnapshot, SourceError> {
        let params = [
            ("symbol", symbol.to_string()),
            ("productType", PRODUCT_TYPE.to_string()),
            ("limit", depth_limit(depth).to_string()),
        ];
        let data = into_data(get_json(&self.client, &self.url("merge-depth"), &params).await?)?;

        let side = |key: &str| -> Result<_, SourceError> {
            let value = data
                .get(key)
                .ok_or_else(|| SourceError::Malformed(format!("merge-depth without {}", key)))?;
            parse_levels(value, depth as usize)
        };

        Ok(OrderBookSnapshot {
            symbol: symbol.clone(),
            timestamp: data.get("ts").and_then(parse_millis).unwrap_or_else(Utc::now),
            bids: side("bids")?,
            asks: side("asks")?,
        })
    }
}
