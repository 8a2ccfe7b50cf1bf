//! Technical indicators powered by the `ta` crate
//!
//! Every function returns the value for the most recent bar of its input and
//! fails with [`IndicatorError::InsufficientHistory`] when the series is too
//! short, instead of padding with `None`/NaN.
//!
//! Available indicators:
//! - Moving Averages: SMA, EMA
//! - Momentum: RSI (Wilder), MACD, KDJ
//! - Volatility: ATR (Wilder), Bollinger Bands

use chrono::{DateTime, Utc};
use statrs::statistics::Statistics;
use std::collections::BTreeMap;
use ta::indicators::{
    BollingerBands as TaBB, ExponentialMovingAverage, MovingAverageConvergenceDivergence,
    SimpleMovingAverage,
};
use ta::Next;
use thiserror::Error;

use crate::config::IndicatorConfig;
use crate::types::{Candle, Interval};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndicatorError {
    #[error("{indicator}: insufficient history ({available} bars, need {required})")]
    InsufficientHistory {
        indicator: &'static str,
        required: usize,
        available: usize,
    },

    #[error("{indicator}: invalid period")]
    InvalidPeriod { indicator: &'static str },

    #[error("{indicator}: input series have different lengths")]
    LengthMismatch { indicator: &'static str },

    #[error("{0}: not computed")]
    NotComputed(String),
}

pub type IndicatorResult<T> = Result<T, IndicatorError>;

fn require(indicator: &'static str, available: usize, required: usize) -> IndicatorResult<()> {
    if available < required {
        return Err(IndicatorError::InsufficientHistory {
            indicator,
            required,
            available,
        });
    }
    Ok(())
}

fn check_period(indicator: &'static str, period: usize) -> IndicatorResult<()> {
    if period == 0 {
        return Err(IndicatorError::InvalidPeriod { indicator });
    }
    Ok(())
}

fn check_hlc(indicator: &'static str, high: &[f64], low: &[f64], close: &[f64]) -> IndicatorResult<()> {
    if high.len() != low.len() || high.len() != close.len() {
        return Err(IndicatorError::LengthMismatch { indicator });
    }
    Ok(())
}

// =============================================================================
// Moving Averages
// =============================================================================

/// Simple Moving Average of the last `period` values
pub fn sma(values: &[f64], period: usize) -> IndicatorResult<f64> {
    check_period("sma", period)?;
    require("sma", values.len(), period)?;

    let mut indicator =
        SimpleMovingAverage::new(period).map_err(|_| IndicatorError::InvalidPeriod { indicator: "sma" })?;
    let mut last = 0.0;
    for &value in values {
        last = indicator.next(value);
    }
    Ok(last)
}

/// Exponential Moving Average at the last value
pub fn ema(values: &[f64], period: usize) -> IndicatorResult<f64> {
    check_period("ema", period)?;
    require("ema", values.len(), period)?;

    let mut indicator = ExponentialMovingAverage::new(period)
        .map_err(|_| IndicatorError::InvalidPeriod { indicator: "ema" })?;
    let mut last = 0.0;
    for &value in values {
        last = indicator.next(value);
    }
    Ok(last)
}

/// Arithmetic mean, `None` for an empty slice
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().mean())
}

// =============================================================================
// Volatility Indicators
// =============================================================================

/// Calculate True Range
pub fn true_range(high: &[f64], low: &[f64], close: &[f64]) -> Vec<f64> {
    let mut tr = Vec::with_capacity(high.len());

    for i in 0..high.len() {
        let tr_value = if i == 0 {
            high[i] - low[i]
        } else {
            let hl = high[i] - low[i];
            let hc = (high[i] - close[i - 1]).abs();
            let lc = (low[i] - close[i - 1]).abs();
            hl.max(hc).max(lc)
        };
        tr.push(tr_value);
    }

    tr
}

/// Average True Range using Wilder's smoothing
///
/// The first value is the SMA of the first `period` true ranges, then
/// ATR = (prev_ATR * (period - 1) + current_TR) / period
pub fn atr(high: &[f64], low: &[f64], close: &[f64], period: usize) -> IndicatorResult<f64> {
    check_period("atr", period)?;
    check_hlc("atr", high, low, close)?;
    require("atr", close.len(), period)?;

    let tr = true_range(high, low, close);
    let mut atr_value = tr[..period].iter().sum::<f64>() / period as f64;
    for &value in &tr[period..] {
        atr_value = (atr_value * (period - 1) as f64 + value) / period as f64;
    }

    Ok(atr_value)
}

/// Bollinger Bands result
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bands {
    pub upper: f64,
    pub mid: f64,
    pub lower: f64,
}

/// Bollinger Bands at the last value using the ta crate
pub fn bollinger(values: &[f64], period: usize, num_std: f64) -> IndicatorResult<Bands> {
    check_period("bollinger", period)?;
    if !(num_std > 0.0) {
        return Err(IndicatorError::InvalidPeriod {
            indicator: "bollinger",
        });
    }
    require("bollinger", values.len(), period)?;

    let mut indicator = TaBB::new(period, num_std).map_err(|_| IndicatorError::InvalidPeriod {
        indicator: "bollinger",
    })?;

    let mut bands = Bands {
        upper: 0.0,
        mid: 0.0,
        lower: 0.0,
    };
    for &value in values {
        let bb = indicator.next(value);
        bands = Bands {
            upper: bb.upper,
            mid: bb.average,
            lower: bb.lower,
        };
    }

    Ok(bands)
}

// =============================================================================
// Momentum Indicators
// =============================================================================

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        if avg_gain == 0.0 {
            50.0
        } else {
            100.0
        }
    } else {
        let rs = avg_gain / avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    }
}

/// Relative Strength Index with Wilder's smoothing
///
/// Needs `period` price changes, i.e. `period + 1` closes. The seed averages
/// are the simple means of the first `period` gains and losses.
pub fn rsi(closes: &[f64], period: usize) -> IndicatorResult<f64> {
    check_period("rsi", period)?;
    require("rsi", closes.len(), period + 1)?;

    let (mut avg_gain, mut avg_loss) = (0.0, 0.0);
    for w in closes[..=period].windows(2) {
        let change = w[1] - w[0];
        if change > 0.0 {
            avg_gain += change;
        } else {
            avg_loss -= change;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;

    let n = period as f64;
    for w in closes[period..].windows(2) {
        let change = w[1] - w[0];
        avg_gain = (avg_gain * (n - 1.0) + change.max(0.0)) / n;
        avg_loss = (avg_loss * (n - 1.0) + (-change).max(0.0)) / n;
    }

    Ok(rsi_from_averages(avg_gain, avg_loss))
}

/// MACD result
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdOutput {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// MACD at the last value using the ta crate; needs `slow + signal` closes
pub fn macd(
    values: &[f64],
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,
) -> IndicatorResult<MacdOutput> {
    check_period("macd", fast_period)?;
    check_period("macd", slow_period)?;
    check_period("macd", signal_period)?;
    require("macd", values.len(), slow_period + signal_period)?;

    let mut indicator =
        MovingAverageConvergenceDivergence::new(fast_period, slow_period, signal_period)
            .map_err(|_| IndicatorError::InvalidPeriod { indicator: "macd" })?;

    let mut out = MacdOutput {
        macd: 0.0,
        signal: 0.0,
        histogram: 0.0,
    };
    for &value in values {
        let m = indicator.next(value);
        out = MacdOutput {
            macd: m.macd,
            signal: m.signal,
            histogram: m.histogram,
        };
    }

    Ok(out)
}

/// KDJ lines
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Kdj {
    pub k: f64,
    pub d: f64,
    pub j: f64,
}

/// KDJ stochastic: RSV over `period` bars, K and D seeded at 50 and smoothed
/// with weight 1/3, J = 3K - 2D. A flat window counts as RSV 50.
pub fn kdj(high: &[f64], low: &[f64], close: &[f64], period: usize) -> IndicatorResult<Kdj> {
    check_period("kdj", period)?;
    check_hlc("kdj", high, low, close)?;
    require("kdj", close.len(), period)?;

    let (mut k, mut d) = (50.0, 50.0);
    for i in (period - 1)..close.len() {
        let window = i + 1 - period..=i;
        let highest = high[window.clone()].iter().fold(f64::MIN, |a, &b| a.max(b));
        let lowest = low[window].iter().fold(f64::MAX, |a, &b| a.min(b));
        let range = highest - lowest;
        let rsv = if range > 0.0 {
            (close[i] - lowest) / range * 100.0
        } else {
            50.0
        };
        k = (2.0 * k + rsv) / 3.0;
        d = (2.0 * d + k) / 3.0;
    }

    Ok(Kdj {
        k,
        d,
        j: 3.0 * k - 2.0 * d,
    })
}

/// J line of [`kdj`]
pub fn kdj_j(high: &[f64], low: &[f64], close: &[f64], period: usize) -> IndicatorResult<f64> {
    kdj(high, low, close, period).map(|v| v.j)
}

// =============================================================================
// Indicator Set
// =============================================================================

/// Names used in an [`IndicatorSet`]
pub mod keys {
    pub const RSI: &str = "rsi";
    pub const MACD: &str = "macd";
    pub const MACD_SIGNAL: &str = "macd_signal";
    pub const MACD_HIST: &str = "macd_hist";
    pub const ATR: &str = "atr";
    pub const KDJ_K: &str = "kdj_k";
    pub const KDJ_D: &str = "kdj_d";
    pub const KDJ_J: &str = "kdj_j";
    pub const BB_UPPER: &str = "bb_upper";
    pub const BB_MID: &str = "bb_mid";
    pub const BB_LOWER: &str = "bb_lower";
    pub const EMA: &str = "ema";
    pub const SMA: &str = "sma";
}

/// Latest indicator values for one symbol/interval
///
/// Indicators that could not be computed keep their error so the evaluator
/// can tell "missing" from "zero".
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorSet {
    pub interval: Interval,
    /// Open time of the last bar used
    pub bar_time: Option<DateTime<Utc>>,
    values: BTreeMap<String, IndicatorResult<f64>>,
}

impl IndicatorSet {
    pub fn new(interval: Interval, bar_time: Option<DateTime<Utc>>) -> Self {
        IndicatorSet {
            interval,
            bar_time,
            values: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, name: &str, value: f64) {
        self.values.insert(name.to_string(), Ok(value));
    }

    pub fn record(&mut self, name: &str, result: IndicatorResult<f64>) {
        self.values.insert(name.to_string(), result);
    }

    pub fn get(&self, name: &str) -> IndicatorResult<f64> {
        self.values
            .get(name)
            .cloned()
            .unwrap_or_else(|| Err(IndicatorError::NotComputed(name.to_string())))
    }

    pub fn value(&self, name: &str) -> Option<f64> {
        self.get(name).ok()
    }

    /// Successfully computed values only
    pub fn snapshot(&self) -> BTreeMap<String, f64> {
        self.values
            .iter()
            .filter_map(|(k, v)| v.as_ref().ok().map(|v| (k.clone(), *v)))
            .collect()
    }

    /// Names of indicators that failed, with their errors
    pub fn failures(&self) -> Vec<(&str, &IndicatorError)> {
        self.values
            .iter()
            .filter_map(|(k, v)| v.as_ref().err().map(|e| (k.as_str(), e)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Drop trailing candles that have not closed yet at `now`
pub fn completed_bars(candles: &[Candle], interval: Interval, now: DateTime<Utc>) -> &[Candle] {
    let mut end = candles.len();
    while end > 0 && candles[end - 1].open_time + interval.duration() > now {
        end -= 1;
    }
    &candles[..end]
}

/// Computes an [`IndicatorSet`] from a candle series
#[derive(Debug, Clone)]
pub struct IndicatorEngine {
    params: IndicatorConfig,
}

impl IndicatorEngine {
    pub fn new(params: IndicatorConfig) -> Self {
        IndicatorEngine { params }
    }

    pub fn params(&self) -> &IndicatorConfig {
        &self.params
    }

    /// Compute every configured indicator; failures are recorded per name
    pub fn compute(&self, interval: Interval, candles: &[Candle]) -> IndicatorSet {
        let p = &self.params;
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let highs: Vec<f64> = candles.iter().map(|c| c.high).collect();
        let lows: Vec<f64> = candles.iter().map(|c| c.low).collect();

        let mut set = IndicatorSet::new(interval, candles.last().map(|c| c.open_time));

        set.record(keys::RSI, rsi(&closes, p.rsi_period));
        set.record(keys::ATR, atr(&highs, &lows, &closes, p.atr_period));
        set.record(keys::EMA, ema(&closes, p.ema_period));
        set.record(keys::SMA, sma(&closes, p.sma_period));

        match macd(&closes, p.macd_fast, p.macd_slow, p.macd_signal) {
            Ok(m) => {
                set.insert(keys::MACD, m.macd);
                set.insert(keys::MACD_SIGNAL, m.signal);
                set.insert(keys::MACD_HIST, m.histogram);
            }
            Err(e) => {
                for key in [keys::MACD, keys::MACD_SIGNAL, keys::MACD_HIST] {
                    set.record(key, Err(e.clone()));
                }
            }
        }

        match kdj(&highs, &lows, &closes, p.kdj_period) {
            Ok(v) => {
                set.insert(keys::KDJ_K, v.k);
                set.insert(keys::KDJ_D, v.d);
                set.insert(keys::KDJ_J, v.j);
            }
            Err(e) => {
                for key in [keys::KDJ_K, keys::KDJ_D, keys::KDJ_J] {
                    set.record(key, Err(e.clone()));
                }
            }
        }

        match bollinger(&closes, p.bollinger_period, p.bollinger_std) {
            Ok(b) => {
                set.insert(keys::BB_UPPER, b.upper);
                set.insert(keys::BB_MID, b.mid);
                set.insert(keys::BB_LOWER, b.lower);
            }
            Err(e) => {
                for key in [keys::BB_UPPER, keys::BB_MID, keys::BB_LOWER] {
                    set.record(key, Err(e.clone()));
                }
            }
        }

        set
    }
}

// =============================================================================
// Tests
// =============================================================================
