//! Signal rules
//!
//! A direction fires when the primary RSI (and the confirming timeframe RSI,
//! when configured) is beyond its band AND at least one enabled secondary
//! confirmation agrees: MACD vs. signal line, KDJ-J extreme, price spike,
//! or ATR surge. Evaluation is pure: the same inputs give the same Signal.

use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::config::{LevelMode, SignalConfig};
use crate::indicators::{keys, mean, IndicatorError, IndicatorSet};
use crate::types::{Candle, Direction, OrderBookSnapshot, Signal, Symbol, TradeLevels, Trigger};

/// Fraction of the margin-implied move at which the liquidation estimate sits
const LIQUIDATION_BUFFER: f64 = 0.98;

/// Latest price action for the evaluated bar
#[derive(Debug, Clone, PartialEq)]
pub struct PriceContext {
    /// Latest completed bar
    pub bar: Candle,
    pub prev_close: Option<f64>,
    /// Mean volume of the bars preceding `bar`
    pub avg_volume: Option<f64>,
    pub book: Option<OrderBookSnapshot>,
}

impl PriceContext {
    /// Build from a completed-bar series; `None` for an empty series
    pub fn from_candles(candles: &[Candle], volume_lookback: usize) -> Option<Self> {
        let (bar, history) = candles.split_last()?;
        let start = history.len().saturating_sub(volume_lookback);
        let volumes: Vec<f64> = history[start..].iter().map(|c| c.volume).collect();

        Some(PriceContext {
            bar: bar.clone(),
            prev_close: history.last().map(|c| c.close),
            avg_volume: mean(&volumes),
            book: None,
        })
    }

    pub fn with_book(mut self, book: OrderBookSnapshot) -> Self {
        self.book = Some(book);
        self
    }

    /// Signed close-to-close change in percent
    pub fn change_pct(&self) -> Option<f64> {
        let prev = self.prev_close.filter(|p| *p > 0.0)?;
        Some((self.bar.close - prev) / prev * 100.0)
    }

    /// Current volume over the trailing average
    pub fn volume_ratio(&self) -> Option<f64> {
        let avg = self.avg_volume.filter(|v| *v > 0.0)?;
        Some(self.bar.volume / avg)
    }
}

/// `|change| >= threshold_pct`, and when a multiplier is given, volume at
/// least `multiplier` times the trailing average
pub fn detect_spike(ctx: &PriceContext, threshold_pct: f64, volume_multiplier: Option<f64>) -> bool {
    let Some(change) = ctx.change_pct() else {
        return false;
    };
    if change.abs() < threshold_pct {
        return false;
    }
    match volume_multiplier {
        Some(multiplier) => ctx.volume_ratio().is_some_and(|r| r >= multiplier),
        None => true,
    }
}

/// Required indicator values, read once per evaluation
struct Inputs {
    rsi: f64,
    confirm_rsi: Option<f64>,
    macd: Option<(f64, f64)>,
    kdj_j: Option<f64>,
    atr: Option<f64>,
}

pub struct SignalEvaluator {
    config: SignalConfig,
    require_confirm: bool,
}

impl SignalEvaluator {
    /// `require_confirm` is true when a confirming interval is scanned
    pub fn new(config: SignalConfig, require_confirm: bool) -> Self {
        SignalEvaluator {
            config,
            require_confirm,
        }
    }

    pub fn config(&self) -> &SignalConfig {
        &self.config
    }

    fn inputs(
        &self,
        primary: &IndicatorSet,
        confirm: Option<&IndicatorSet>,
    ) -> Result<Inputs, IndicatorError> {
        let c = &self.config;

        let confirm_rsi = if self.require_confirm {
            let set = confirm.ok_or_else(|| IndicatorError::NotComputed("confirm_rsi".into()))?;
            Some(set.get(keys::RSI)?)
        } else {
            None
        };

        Ok(Inputs {
            rsi: primary.get(keys::RSI)?,
            confirm_rsi,
            macd: match c.use_macd {
                true => Some((primary.get(keys::MACD)?, primary.get(keys::MACD_SIGNAL)?)),
                false => None,
            },
            kdj_j: match c.use_kdj {
                true => Some(primary.get(keys::KDJ_J)?),
                false => None,
            },
            atr: match c.use_atr_surge {
                true => Some(primary.get(keys::ATR)?),
                false => None,
            },
        })
    }

    /// Triggers for `direction`, or `None` when its conditions do not hold
    fn check(&self, direction: Direction, inputs: &Inputs, ctx: &PriceContext) -> Option<Vec<Trigger>> {
        let c = &self.config;
        let short = direction == Direction::Short;
        let mut triggers = Vec::new();

        let rsi_hit = if short {
            inputs.rsi >= c.rsi_overbought
        } else {
            inputs.rsi <= c.rsi_oversold
        };
        if !rsi_hit {
            return None;
        }
        triggers.push(if short { Trigger::RsiOverbought } else { Trigger::RsiOversold });

        if let Some(confirm_rsi) = inputs.confirm_rsi {
            let hit = if short {
                confirm_rsi >= c.confirm_rsi_overbought
            } else {
                confirm_rsi <= c.confirm_rsi_oversold
            };
            if !hit {
                return None;
            }
            triggers.push(if short {
                Trigger::ConfirmRsiOverbought
            } else {
                Trigger::ConfirmRsiOversold
            });
        }

        let primary_len = triggers.len();

        if let Some((macd, signal)) = inputs.macd {
            if short && macd < signal {
                triggers.push(Trigger::MacdBearish);
            } else if !short && macd > signal {
                triggers.push(Trigger::MacdBullish);
            }
        }

        if let Some(j) = inputs.kdj_j {
            if short && j >= c.kdj_upper {
                triggers.push(Trigger::KdjHigh);
            } else if !short && j <= c.kdj_lower {
                triggers.push(Trigger::KdjLow);
            }
        }

        if c.use_spike {
            let multiplier = c.require_volume_for_spike.then_some(c.volume_multiplier);
            if detect_spike(ctx, c.spike_threshold_pct, multiplier) {
                triggers.push(Trigger::PriceSpike);
            }
        }

        if let Some(atr) = inputs.atr {
            if atr > 0.0 && ctx.bar.range() >= c.atr_surge_multiplier * atr {
                triggers.push(Trigger::AtrSurge);
            }
        }

        if triggers.len() == primary_len {
            return None;
        }

        if c.order_book.enabled {
            let book = ctx.book.as_ref()?;
            if let Some(max_spread) = c.order_book.max_spread_pct {
                if book.spread_pct()? > max_spread {
                    return None;
                }
            }
            if book.imbalance(direction)? < c.order_book.min_imbalance {
                return None;
            }
            triggers.push(Trigger::BookImbalance);
        }

        Some(triggers)
    }

    /// Stop-loss, take-profit and optional liquidation estimate for an entry
    ///
    /// ATR mode falls back to percent offsets when ATR is unavailable.
    pub fn trade_levels(&self, direction: Direction, entry: f64, atr: Option<f64>) -> TradeLevels {
        let l = &self.config.levels;
        let sign = match direction {
            Direction::Short => -1.0,
            _ => 1.0,
        };

        let (stop_loss, take_profit) = match (l.mode, atr.filter(|a| *a > 0.0)) {
            (LevelMode::Atr, Some(atr)) => (
                entry - sign * l.atr_stop_multiplier * atr,
                entry + sign * l.atr_take_multiplier * atr,
            ),
            _ => (
                entry * (1.0 - sign * l.stop_pct / 100.0),
                entry * (1.0 + sign * l.take_pct / 100.0),
            ),
        };

        TradeLevels {
            entry,
            stop_loss,
            take_profit,
            liquidation: l
                .leverage
                .map(|lev| entry - sign * entry / lev * LIQUIDATION_BUFFER),
        }
    }

    /// Decide LONG / SHORT / NONE for the latest completed bar
    ///
    /// Missing required indicators yield NONE, never an error.
    pub fn evaluate(
        &self,
        symbol: &Symbol,
        primary: &IndicatorSet,
        confirm: Option<&IndicatorSet>,
        ctx: &PriceContext,
    ) -> Signal {
        let mut snapshot: BTreeMap<String, f64> = primary.snapshot();
        if let Some(rsi) = confirm.and_then(|set| set.value(keys::RSI)) {
            snapshot.insert("confirm_rsi".to_string(), rsi);
        }
        if let Some(change) = ctx.change_pct() {
            snapshot.insert("change_pct".to_string(), change);
        }
        if let Some(ratio) = ctx.volume_ratio() {
            snapshot.insert("volume_ratio".to_string(), ratio);
        }

        let none = |snapshot| Signal::none(symbol.clone(), primary.interval, snapshot, ctx.bar.open_time);

        let inputs = match self.inputs(primary, confirm) {
            Ok(inputs) => inputs,
            Err(e) => {
                debug!(%symbol, kind = "insufficient_history", error = %e, "required indicator missing");
                return none(snapshot);
            }
        };

        let short = self.check(Direction::Short, &inputs, ctx);
        let long = self.check(Direction::Long, &inputs, ctx);

        let (direction, triggers) = match (short, long) {
            (Some(triggers), Some(_)) => {
                warn!(%symbol, "LONG and SHORT both matched; SHORT takes precedence");
                (Direction::Short, triggers)
            }
            (Some(triggers), None) => (Direction::Short, triggers),
            (None, Some(triggers)) => (Direction::Long, triggers),
            (None, None) => return none(snapshot),
        };

        Signal {
            symbol: symbol.clone(),
            interval: primary.interval,
            direction,
            levels: Some(self.trade_levels(direction, ctx.bar.close, primary.value(keys::ATR))),
            triggers,
            indicators: snapshot,
            timestamp: ctx.bar.open_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndicatorConfig;
    use crate::indicators::{rsi, IndicatorEngine};
    use crate::types::{BookLevel, Interval};
    use approx::assert_relative_eq;
    use chrono::{Duration, TimeZone, Utc};

    fn bar(i: i64, open: f64, close: f64, volume: f64) -> Candle {
        Candle {
            open_time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(15 * i),
            open,
            high: open.max(close),
            low: open.min(close),
            close,
            volume,
        }
    }

    fn flat_ctx(close: f64) -> PriceContext {
        PriceContext {
            bar: bar(0, close, close, 100.0),
            prev_close: Some(close),
            avg_volume: Some(100.0),
            book: None,
        }
    }

    fn set(values: &[(&str, f64)]) -> IndicatorSet {
        let mut set = IndicatorSet::new(Interval::M15, None);
        for (k, v) in values {
            set.insert(k, *v);
        }
        set
    }

    fn no_confirm_config() -> SignalConfig {
        SignalConfig {
            use_kdj: false,
            use_spike: false,
            ..SignalConfig::default()
        }
    }

    #[test]
    fn test_rising_series_without_macd_confirmation_is_none() {
        let closes: Vec<f64> = (100..120).map(f64::from).collect();
        let rsi_value = rsi(&closes, 14).unwrap();
        assert_relative_eq!(rsi_value, 100.0);

        let config = SignalConfig {
            rsi_overbought: 85.0,
            ..no_confirm_config()
        };
        let evaluator = SignalEvaluator::new(config, false);
        // Uptrend: MACD above its signal line, no bearish crossover
        let primary = set(&[(keys::RSI, rsi_value), (keys::MACD, 1.2), (keys::MACD_SIGNAL, 0.9)]);

        let signal = evaluator.evaluate(&Symbol::new("BTCUSDT"), &primary, None, &flat_ctx(119.0));
        assert_eq!(signal.direction, Direction::None);
        assert!(signal.levels.is_none());
        assert_eq!(signal.indicators.get(keys::RSI), Some(&100.0));
    }

    #[test]
    fn test_spike_with_volume_surge() {
        let mut candles: Vec<Candle> = (0..10).map(|i| bar(i, 100.0, 100.0, 100.0)).collect();
        candles.push(bar(10, 100.0, 102.0, 300.0));

        let ctx = PriceContext::from_candles(&candles, 10).unwrap();
        assert_relative_eq!(ctx.avg_volume.unwrap(), 100.0);
        assert_relative_eq!(ctx.change_pct().unwrap(), 2.0, epsilon = 1e-9);

        assert!(detect_spike(&ctx, 1.5, Some(2.0)));
        assert!(!detect_spike(&ctx, 2.5, Some(2.0)));
        assert!(!detect_spike(&ctx, 1.5, Some(4.0)));
        assert!(detect_spike(&ctx, 1.5, None));
    }

    #[test]
    fn test_atr_levels_for_long() {
        let evaluator = SignalEvaluator::new(SignalConfig::default(), false);
        let levels = evaluator.trade_levels(Direction::Long, 100.0, Some(2.0));
        assert_relative_eq!(levels.stop_loss, 97.0);
        assert_relative_eq!(levels.take_profit, 105.0);
        assert_eq!(levels.liquidation, None);

        let short = evaluator.trade_levels(Direction::Short, 100.0, Some(2.0));
        assert_relative_eq!(short.stop_loss, 103.0);
        assert_relative_eq!(short.take_profit, 95.0);
    }

    #[test]
    fn test_percent_levels_and_fallback() {
        let mut config = SignalConfig::default();
        config.levels.leverage = Some(20.0);
        let evaluator = SignalEvaluator::new(config, false);

        // ATR unavailable: percent offsets
        let levels = evaluator.trade_levels(Direction::Short, 200.0, None);
        assert_relative_eq!(levels.stop_loss, 201.0);
        assert_relative_eq!(levels.take_profit, 199.0);
        assert_relative_eq!(levels.liquidation.unwrap(), 200.0 + 200.0 / 20.0 * 0.98);
    }

    #[test]
    fn test_short_with_kdj_and_confirm_rsi() {
        let config = SignalConfig {
            use_spike: false,
            ..SignalConfig::default()
        };
        let evaluator = SignalEvaluator::new(config, true);
        let primary = set(&[
            (keys::RSI, 84.0),
            (keys::MACD, 1.0),
            (keys::MACD_SIGNAL, 0.5),
            (keys::KDJ_J, 95.0),
            (keys::ATR, 1.0),
        ]);
        let confirm = set(&[(keys::RSI, 75.0)]);

        let signal = evaluator.evaluate(&Symbol::new("ETHUSDT"), &primary, Some(&confirm), &flat_ctx(50.0));
        assert_eq!(signal.direction, Direction::Short);
        assert_eq!(
            signal.triggers,
            vec![Trigger::RsiOverbought, Trigger::ConfirmRsiOverbought, Trigger::KdjHigh]
        );
        let levels = signal.levels.unwrap();
        assert_relative_eq!(levels.stop_loss, 51.5);
        assert_eq!(signal.indicators.get("confirm_rsi"), Some(&75.0));

        // Confirming timeframe not overbought
        let cool = set(&[(keys::RSI, 60.0)]);
        let signal = evaluator.evaluate(&Symbol::new("ETHUSDT"), &primary, Some(&cool), &flat_ctx(50.0));
        assert_eq!(signal.direction, Direction::None);
    }

    #[test]
    fn test_long_with_macd_bullish() {
        let evaluator = SignalEvaluator::new(no_confirm_config(), false);
        let primary = set(&[(keys::RSI, 22.0), (keys::MACD, -0.1), (keys::MACD_SIGNAL, -0.3)]);

        let signal = evaluator.evaluate(&Symbol::new("SOLUSDT"), &primary, None, &flat_ctx(20.0));
        assert_eq!(signal.direction, Direction::Long);
        assert_eq!(signal.triggers, vec![Trigger::RsiOversold, Trigger::MacdBullish]);
    }

    #[test]
    fn test_missing_required_indicator_is_none() {
        let evaluator = SignalEvaluator::new(no_confirm_config(), true);
        let primary = set(&[(keys::RSI, 90.0), (keys::MACD, -1.0), (keys::MACD_SIGNAL, 0.0)]);

        // Confirm interval configured but not supplied
        let signal = evaluator.evaluate(&Symbol::new("X"), &primary, None, &flat_ctx(1.0));
        assert_eq!(signal.direction, Direction::None);

        // MACD enabled but not computed
        let evaluator = SignalEvaluator::new(no_confirm_config(), false);
        let primary = set(&[(keys::RSI, 90.0)]);
        let signal = evaluator.evaluate(&Symbol::new("X"), &primary, None, &flat_ctx(1.0));
        assert_eq!(signal.direction, Direction::None);
    }

    #[test]
    fn test_short_wins_when_bands_overlap() {
        // ATR surge confirms both sides at once
        let config = SignalConfig {
            rsi_overbought: 40.0,
            rsi_oversold: 60.0,
            use_macd: false,
            use_atr_surge: true,
            ..no_confirm_config()
        };
        let evaluator = SignalEvaluator::new(config, false);

        let primary = set(&[(keys::RSI, 50.0), (keys::ATR, 1.0)]);
        let mut ctx = flat_ctx(100.0);
        ctx.bar.high = 102.0;
        ctx.bar.low = 99.0;

        let signal = evaluator.evaluate(&Symbol::new("X"), &primary, None, &ctx);
        assert_eq!(signal.direction, Direction::Short);
        assert_eq!(signal.triggers, vec![Trigger::RsiOverbought, Trigger::AtrSurge]);
    }

    #[test]
    fn test_order_book_filter() {
        let mut config = no_confirm_config();
        config.order_book.enabled = true;
        config.order_book.min_imbalance = 1.5;
        let evaluator = SignalEvaluator::new(config, false);
        let primary = set(&[(keys::RSI, 20.0), (keys::MACD, 0.2), (keys::MACD_SIGNAL, 0.1)]);
        let symbol = Symbol::new("BTCUSDT");

        let book = |bid_size: f64, ask_size: f64| OrderBookSnapshot {
            symbol: symbol.clone(),
            timestamp: Utc::now(),
            bids: vec![BookLevel { price: 100.0, size: bid_size }],
            asks: vec![BookLevel { price: 100.1, size: ask_size }],
        };

        // No book while the filter is on
        let signal = evaluator.evaluate(&symbol, &primary, None, &flat_ctx(100.0));
        assert_eq!(signal.direction, Direction::None);

        let ctx = flat_ctx(100.0).with_book(book(3.0, 1.0));
        let signal = evaluator.evaluate(&symbol, &primary, None, &ctx);
        assert_eq!(signal.direction, Direction::Long);
        assert_eq!(signal.triggers.last(), Some(&Trigger::BookImbalance));

        let ctx = flat_ctx(100.0).with_book(book(1.0, 1.0));
        assert_eq!(evaluator.evaluate(&symbol, &primary, None, &ctx).direction, Direction::None);
    }

    #[test]
    fn test_evaluate_is_idempotent() {
        let closes: Vec<f64> = (0..80)
            .map(|i| 100.0 + (i as f64 * 0.7).sin() * 5.0 + i as f64 * 0.3)
            .collect();
        let candles: Vec<Candle> = closes
            .windows(2)
            .enumerate()
            .map(|(i, w)| bar(i as i64, w[0], w[1], 100.0 + (i % 7) as f64 * 40.0))
            .collect();

        let engine = IndicatorEngine::new(IndicatorConfig::default());
        let primary = engine.compute(Interval::M15, &candles);
        let ctx = PriceContext::from_candles(&candles, 10).unwrap();
        let evaluator = SignalEvaluator::new(SignalConfig::default(), false);
        let symbol = Symbol::new("BTCUSDT");

        let first = evaluator.evaluate(&symbol, &primary, None, &ctx);
        let second = evaluator.evaluate(&symbol, &primary, None, &ctx);
        assert_eq!(first, second);
        assert_eq!(first.timestamp, candles.last().unwrap().open_time);
    }

    #[test]
    fn test_price_context_edges() {
        assert!(PriceContext::from_candles(&[], 10).is_none());

        let ctx = PriceContext::from_candles(&[bar(0, 10.0, 11.0, 5.0)], 10).unwrap();
        assert_eq!(ctx.prev_close, None);
        assert_eq!(ctx.avg_volume, None);
        assert!(!detect_spike(&ctx, 0.1, None));
    }
}
