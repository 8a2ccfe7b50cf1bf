//! Core data types used across the scanner

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Validation errors for candle data
#[derive(Debug, Error, PartialEq)]
pub enum CandleValidationError {
    #[error("high ({high}) must be >= low ({low})")]
    HighLessThanLow { high: f64, low: f64 },

    #[error("volume ({0}) must be >= 0")]
    NegativeVolume(f64),

    #[error("open ({open}) must be between low ({low}) and high ({high})")]
    OpenOutOfRange { open: f64, low: f64, high: f64 },

    #[error("close ({close}) must be between low ({low}) and high ({high})")]
    CloseOutOfRange { close: f64, low: f64, high: f64 },

    #[error("prices must be positive and finite: open={open}, high={high}, low={low}, close={close}")]
    NonPositivePrice {
        open: f64,
        high: f64,
        low: f64,
        close: f64,
    },
}

/// OHLCV candlestick data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Validate the candle data
    pub fn validate(&self) -> Result<(), CandleValidationError> {
        let prices = [self.open, self.high, self.low, self.close];
        if prices.iter().any(|p| !p.is_finite() || *p <= 0.0) {
            return Err(CandleValidationError::NonPositivePrice {
                open: self.open,
                high: self.high,
                low: self.low,
                close: self.close,
            });
        }

        if self.high < self.low {
            return Err(CandleValidationError::HighLessThanLow {
                high: self.high,
                low: self.low,
            });
        }

        if !self.volume.is_finite() || self.volume < 0.0 {
            return Err(CandleValidationError::NegativeVolume(self.volume));
        }

        if self.open < self.low || self.open > self.high {
            return Err(CandleValidationError::OpenOutOfRange {
                open: self.open,
                low: self.low,
                high: self.high,
            });
        }

        if self.close < self.low || self.close > self.high {
            return Err(CandleValidationError::CloseOutOfRange {
                close: self.close,
                low: self.low,
                high: self.high,
            });
        }

        Ok(())
    }

    /// Bar range (high - low)
    pub fn range(&self) -> f64 {
        self.high - self.low
    }
}

/// Trading pair symbol
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Symbol(pub String);

impl Symbol {
    pub fn new(s: impl Into<String>) -> Self {
        Symbol(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Supported candle granularities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Interval {
    M1,
    M3,
    M5,
    M15,
    M30,
    H1,
    H2,
    H4,
    H6,
    H12,
    D1,
}

impl Interval {
    pub const ALL: [Interval; 11] = [
        Interval::M1,
        Interval::M3,
        Interval::M5,
        Interval::M15,
        Interval::M30,
        Interval::H1,
        Interval::H2,
        Interval::H4,
        Interval::H6,
        Interval::H12,
        Interval::D1,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::M1 => "1m",
            Interval::M3 => "3m",
            Interval::M5 => "5m",
            Interval::M15 => "15m",
            Interval::M30 => "30m",
            Interval::H1 => "1h",
            Interval::H2 => "2h",
            Interval::H4 => "4h",
            Interval::H6 => "6h",
            Interval::H12 => "12h",
            Interval::D1 => "1d",
        }
    }

    pub fn minutes(&self) -> i64 {
        match self {
            Interval::M1 => 1,
            Interval::M3 => 3,
            Interval::M5 => 5,
            Interval::M15 => 15,
            Interval::M30 => 30,
            Interval::H1 => 60,
            Interval::H2 => 120,
            Interval::H4 => 240,
            Interval::H6 => 360,
            Interval::H12 => 720,
            Interval::D1 => 1440,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::minutes(self.minutes())
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        Interval::ALL
            .iter()
            .copied()
            .find(|i| i.as_str() == normalized)
            .ok_or_else(|| format!("unsupported interval '{}'", s))
    }
}

impl TryFrom<String> for Interval {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Interval> for String {
    fn from(value: Interval) -> Self {
        value.as_str().to_string()
    }
}

/// One price level of an order book
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: f64,
    pub size: f64,
}

/// Best-first bid/ask levels at a point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub symbol: Symbol,
    pub timestamp: DateTime<Utc>,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

impl OrderBookSnapshot {
    pub fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|l| l.price)
    }

    /// Spread as a percentage of the best bid
    pub fn spread_pct(&self) -> Option<f64> {
        let bid = self.best_bid()?;
        let ask = self.best_ask()?;
        if bid <= 0.0 {
            return None;
        }
        Some((ask - bid).abs() / bid * 100.0)
    }

    pub fn bid_size(&self) -> f64 {
        self.bids.iter().map(|l| l.size).sum()
    }

    pub fn ask_size(&self) -> f64 {
        self.asks.iter().map(|l| l.size).sum()
    }

    /// Resting size on the side backing `direction` over the opposing side
    ///
    /// LONG reads bids over asks, SHORT asks over bids. `None` for NONE or
    /// when the opposing side is empty.
    pub fn imbalance(&self, direction: Direction) -> Option<f64> {
        let (with, against) = match direction {
            Direction::Long => (self.bid_size(), self.ask_size()),
            Direction::Short => (self.ask_size(), self.bid_size()),
            Direction::None => return None,
        };
        if against <= 0.0 {
            return None;
        }
        Some(with / against)
    }
}

/// Signal direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
    None,
}

impl Direction {
    pub fn is_actionable(&self) -> bool {
        !matches!(self, Direction::None)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Direction::Long => "LONG",
            Direction::Short => "SHORT",
            Direction::None => "NONE",
        };
        f.write_str(s)
    }
}

/// Rule that contributed to a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    RsiOverbought,
    RsiOversold,
    ConfirmRsiOverbought,
    ConfirmRsiOversold,
    MacdBearish,
    MacdBullish,
    KdjHigh,
    KdjLow,
    PriceSpike,
    AtrSurge,
    BookImbalance,
}

impl Trigger {
    pub fn label(&self) -> &'static str {
        match self {
            Trigger::RsiOverbought => "RSI overbought",
            Trigger::RsiOversold => "RSI oversold",
            Trigger::ConfirmRsiOverbought => "HTF RSI overbought",
            Trigger::ConfirmRsiOversold => "HTF RSI oversold",
            Trigger::MacdBearish => "MACD below signal",
            Trigger::MacdBullish => "MACD above signal",
            Trigger::KdjHigh => "KDJ-J high",
            Trigger::KdjLow => "KDJ-J low",
            Trigger::PriceSpike => "price spike",
            Trigger::AtrSurge => "ATR surge",
            Trigger::BookImbalance => "order book imbalance",
        }
    }
}

/// Suggested entry and exit prices
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradeLevels {
    pub entry: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub liquidation: Option<f64>,
}

/// Result of evaluating one symbol for one cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: Symbol,
    pub interval: Interval,
    pub direction: Direction,
    /// Present exactly when the direction is actionable
    pub levels: Option<TradeLevels>,
    pub triggers: Vec<Trigger>,
    /// Indicator values the decision was based on
    pub indicators: BTreeMap<String, f64>,
    /// Open time of the evaluated bar
    pub timestamp: DateTime<Utc>,
}

impl Signal {
    pub fn none(
        symbol: Symbol,
        interval: Interval,
        indicators: BTreeMap<String, f64>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Signal {
            symbol,
            interval,
            direction: Direction::None,
            levels: None,
            triggers: Vec::new(),
            indicators,
            timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(open: f64, high: f64, low: f64, close: f64, volume: f64) -> Candle {
        Candle {
            open_time: Utc::now(),
            open,
            high,
            low,
            close,
            volume,
        }
    }

    #[test]
    fn test_candle_validation() {
        assert!(candle(10.0, 11.0, 9.0, 10.5, 100.0).validate().is_ok());
        assert!(matches!(
            candle(10.0, 9.0, 11.0, 10.0, 1.0).validate(),
            Err(CandleValidationError::HighLessThanLow { .. })
        ));
        assert!(matches!(
            candle(10.0, 11.0, 9.0, 10.0, -1.0).validate(),
            Err(CandleValidationError::NegativeVolume(_))
        ));
        assert!(matches!(
            candle(12.0, 11.0, 9.0, 10.0, 1.0).validate(),
            Err(CandleValidationError::OpenOutOfRange { .. })
        ));
        assert!(matches!(
            candle(10.0, 11.0, 9.0, 8.0, 1.0).validate(),
            Err(CandleValidationError::CloseOutOfRange { .. })
        ));
        assert!(matches!(
            candle(0.0, 11.0, 9.0, 10.0, 1.0).validate(),
            Err(CandleValidationError::NonPositivePrice { .. })
        ));
        assert!(candle(f64::NAN, 11.0, 9.0, 10.0, 1.0).validate().is_err());
    }

    #[test]
    fn test_interval_parse() {
        assert_eq!("15m".parse::<Interval>().unwrap(), Interval::M15);
        assert_eq!("1H".parse::<Interval>().unwrap(), Interval::H1);
        assert!("2d".parse::<Interval>().is_err());
        assert_eq!(Interval::H4.duration(), Duration::hours(4));
    }

    #[test]
    fn test_interval_serde() {
        let json = serde_json::to_string(&Interval::M5).unwrap();
        assert_eq!(json, "\"5m\"");
        let parsed: Interval = serde_json::from_str("\"1d\"").unwrap();
        assert_eq!(parsed, Interval::D1);
        assert!(serde_json::from_str::<Interval>("\"7m\"").is_err());
    }

    #[test]
    fn test_order_book_metrics() {
        let book = OrderBookSnapshot {
            symbol: Symbol::new("BTCUSDT"),
            timestamp: Utc::now(),
            bids: vec![
                BookLevel { price: 100.0, size: 3.0 },
                BookLevel { price: 99.5, size: 3.0 },
            ],
            asks: vec![
                BookLevel { price: 100.5, size: 2.0 },
                BookLevel { price: 101.0, size: 1.0 },
            ],
        };

        assert_eq!(book.best_bid(), Some(100.0));
        assert_eq!(book.best_ask(), Some(100.5));
        assert!((book.spread_pct().unwrap() - 0.5).abs() < 1e-9);
        assert!((book.imbalance(Direction::Long).unwrap() - 2.0).abs() < 1e-9);
        assert!((book.imbalance(Direction::Short).unwrap() - 0.5).abs() < 1e-9);
        assert_eq!(book.imbalance(Direction::None), None);
    }

    #[test]
    fn test_empty_book() {
        let book = OrderBookSnapshot {
            symbol: Symbol::new("X"),
            timestamp: Utc::now(),
            bids: vec![],
            asks: vec![],
        };
        assert_eq!(book.spread_pct(), None);
        assert_eq!(book.imbalance(Direction::Long), None);
    }
}
