//! Configuration management
//!
//! Handles loading and parsing of the JSON configuration file. Every section
//! falls back to the canonical default threshold set, and credentials are
//! taken from the environment (`.env` is loaded by the commands).

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

use crate::exchange::Venue;
use crate::types::{Interval, Symbol};

pub const ENV_TELEGRAM_TOKEN: &str = "TELEGRAM_BOT_TOKEN";
pub const ENV_TELEGRAM_CHAT_ID: &str = "TELEGRAM_CHAT_ID";
pub const ENV_BASE_URL: &str = "SCANNER_BASE_URL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub exchange: ExchangeConfig,
    pub scan: ScanConfig,
    pub indicators: IndicatorConfig,
    pub signal: SignalConfig,
    pub alerts: AlertConfig,
    pub notify: NotifyConfig,
}

impl Config {
    /// Load configuration from JSON file and apply environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Config = serde_json::from_str(&contents)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply credential and endpoint overrides from `lookup`
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(token) = non_empty(ENV_TELEGRAM_TOKEN) {
            self.notify.telegram_token = Some(token);
        }
        if let Some(chat_id) = non_empty(ENV_TELEGRAM_CHAT_ID) {
            self.notify.telegram_chat_id = Some(chat_id);
        }
        if let Some(url) = non_empty(ENV_BASE_URL) {
            self.exchange.base_url = Some(url);
        }
    }

    /// Check every section; called once at startup
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.exchange.validate()?;
        self.scan.validate()?;
        self.indicators.validate()?;
        self.signal.validate()?;
        self.notify.validate()?;

        let venue = self.exchange.venue;
        let intervals = std::iter::once(("scan.interval", self.scan.interval))
            .chain(self.scan.confirm_interval.map(|i| ("scan.confirm_interval", i)));
        for (field, interval) in intervals {
            if !venue.supports(interval) {
                return Err(invalid(format!("{} {} is not offered by {}", field, interval, venue)));
            }
        }

        let needed = self.indicators.min_history();
        if (self.scan.candle_limit as usize) < needed {
            warn!(
                candle_limit = self.scan.candle_limit,
                needed, "candle_limit is below the longest indicator warm-up; some indicators will be missing"
            );
        }

        Ok(())
    }
}

/// Exchange and symbol universe configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    pub venue: Venue,
    /// Overrides the venue's public endpoint (tests, proxies)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub quote_asset: String,
    /// Explicit symbols; discovery is skipped when non-empty
    pub symbols: Vec<String>,
    pub exclude: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_symbols: Option<usize>,
    pub symbol_refresh_secs: u64,
    pub timeout_secs: u64,
    /// Total attempts per request, including the first
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    /// Requests per second across all workers
    pub rate_limit: u32,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        ExchangeConfig {
            venue: Venue::Binance,
            base_url: None,
            quote_asset: "USDT".to_string(),
            symbols: Vec::new(),
            exclude: Vec::new(),
            max_symbols: None,
            symbol_refresh_secs: 3600,
            timeout_secs: 10,
            max_retries: 3,
            retry_backoff_ms: 500,
            rate_limit: 10,
        }
    }
}

impl ExchangeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.quote_asset.trim().is_empty() && self.symbols.is_empty() {
            return Err(invalid("exchange.quote_asset must be set when no symbols are listed"));
        }
        if self.timeout_secs == 0 {
            return Err(invalid("exchange.timeout_secs must be > 0"));
        }
        if self.max_retries == 0 {
            return Err(invalid("exchange.max_retries must be >= 1"));
        }
        if self.rate_limit == 0 {
            return Err(invalid("exchange.rate_limit must be > 0"));
        }
        if self.max_symbols == Some(0) {
            return Err(invalid("exchange.max_symbols must be > 0 when set"));
        }
        Ok(())
    }

    pub fn explicit_symbols(&self) -> Vec<Symbol> {
        self.symbols
            .iter()
            .map(|s| Symbol::new(s.trim().to_uppercase()))
            .collect()
    }
}

/// Scan loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Primary (signal) timeframe
    pub interval: Interval,
    /// Higher timeframe whose RSI must confirm
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirm_interval: Option<Interval>,
    pub candle_limit: u32,
    pub poll_interval_secs: u64,
    pub symbol_delay_ms: u64,
    pub max_concurrency: usize,
    /// Evaluate the still-open last candle
    pub use_incomplete_bar: bool,
    pub order_book_depth: u32,
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig {
            interval: Interval::M15,
            confirm_interval: Some(Interval::H1),
            candle_limit: 200,
            poll_interval_secs: 300,
            symbol_delay_ms: 800,
            max_concurrency: 1,
            use_incomplete_bar: false,
            order_book_depth: 5,
        }
    }
}

impl ScanConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.candle_limit == 0 || self.candle_limit > 1000 {
            return Err(invalid("scan.candle_limit must be in 1..=1000"));
        }
        if self.poll_interval_secs == 0 {
            return Err(invalid("scan.poll_interval_secs must be > 0"));
        }
        if self.max_concurrency == 0 {
            return Err(invalid("scan.max_concurrency must be >= 1"));
        }
        if self.order_book_depth == 0 {
            return Err(invalid("scan.order_book_depth must be > 0"));
        }
        if self.confirm_interval == Some(self.interval) {
            warn!(interval = %self.interval, "confirm_interval equals the primary interval");
        }
        Ok(())
    }
}

/// Indicator periods
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorConfig {
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub atr_period: usize,
    pub kdj_period: usize,
    pub bollinger_period: usize,
    pub bollinger_std: f64,
    pub ema_period: usize,
    pub sma_period: usize,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        IndicatorConfig {
            rsi_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            atr_period: 14,
            kdj_period: 9,
            bollinger_period: 20,
            bollinger_std: 2.0,
            ema_period: 20,
            sma_period: 20,
        }
    }
}

impl IndicatorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let periods = [
            ("rsi_period", self.rsi_period),
            ("macd_fast", self.macd_fast),
            ("macd_slow", self.macd_slow),
            ("macd_signal", self.macd_signal),
            ("atr_period", self.atr_period),
            ("kdj_period", self.kdj_period),
            ("bollinger_period", self.bollinger_period),
            ("ema_period", self.ema_period),
            ("sma_period", self.sma_period),
        ];
        if let Some((name, _)) = periods.iter().find(|(_, p)| *p == 0) {
            return Err(invalid(format!("indicators.{} must be > 0", name)));
        }
        if self.macd_fast >= self.macd_slow {
            return Err(invalid("indicators.macd_fast must be < macd_slow"));
        }
        if !(self.bollinger_std > 0.0) {
            return Err(invalid("indicators.bollinger_std must be > 0"));
        }
        Ok(())
    }

    /// Bars needed before every indicator is available
    pub fn min_history(&self) -> usize {
        [
            self.rsi_period + 1,
            self.macd_slow + self.macd_signal,
            self.atr_period,
            self.kdj_period,
            self.bollinger_period,
            self.ema_period,
            self.sma_period,
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
    }
}

/// How stop-loss and take-profit are placed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LevelMode {
    Percent,
    Atr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LevelConfig {
    pub mode: LevelMode,
    /// Percent offsets from entry (0.5 = 0.5%)
    pub stop_pct: f64,
    pub take_pct: f64,
    pub atr_stop_multiplier: f64,
    pub atr_take_multiplier: f64,
    /// Adds a liquidation estimate to the levels when set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leverage: Option<f64>,
}

impl Default for LevelConfig {
    fn default() -> Self {
        LevelConfig {
            mode: LevelMode::Atr,
            stop_pct: 0.5,
            take_pct: 0.5,
            atr_stop_multiplier: 1.5,
            atr_take_multiplier: 2.5,
            leverage: None,
        }
    }
}

/// Optional order book gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BookFilterConfig {
    pub enabled: bool,
    /// LONG needs bid/ask size >= this, SHORT needs ask/bid size >= this
    pub min_imbalance: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_spread_pct: Option<f64>,
}

impl Default for BookFilterConfig {
    fn default() -> Self {
        BookFilterConfig {
            enabled: false,
            min_imbalance: 1.0,
            max_spread_pct: Some(0.5),
        }
    }
}

/// Signal rule thresholds (canonical default set)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    pub rsi_overbought: f64,
    pub rsi_oversold: f64,
    pub confirm_rsi_overbought: f64,
    pub confirm_rsi_oversold: f64,

    pub use_macd: bool,
    pub use_kdj: bool,
    pub kdj_upper: f64,
    pub kdj_lower: f64,

    pub use_spike: bool,
    /// Close-to-close move in percent (1.5 = 1.5%)
    pub spike_threshold_pct: f64,
    pub require_volume_for_spike: bool,
    pub volume_multiplier: f64,
    /// Bars before the current one averaged for the volume baseline
    pub volume_lookback: usize,

    pub use_atr_surge: bool,
    pub atr_surge_multiplier: f64,

    pub levels: LevelConfig,
    pub order_book: BookFilterConfig,
}

impl Default for SignalConfig {
    fn default() -> Self {
        SignalConfig {
            rsi_overbought: 80.0,
            rsi_oversold: 30.0,
            confirm_rsi_overbought: 70.0,
            confirm_rsi_oversold: 35.0,
            use_macd: true,
            use_kdj: true,
            kdj_upper: 90.0,
            kdj_lower: 10.0,
            use_spike: true,
            spike_threshold_pct: 1.5,
            require_volume_for_spike: true,
            volume_multiplier: 2.0,
            volume_lookback: 10,
            use_atr_surge: false,
            atr_surge_multiplier: 1.5,
            levels: LevelConfig::default(),
            order_book: BookFilterConfig::default(),
        }
    }
}

impl SignalConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let bands = [
            ("rsi_overbought", self.rsi_overbought),
            ("rsi_oversold", self.rsi_oversold),
            ("confirm_rsi_overbought", self.confirm_rsi_overbought),
            ("confirm_rsi_oversold", self.confirm_rsi_oversold),
        ];
        for (name, value) in bands {
            if !(0.0..=100.0).contains(&value) {
                return Err(invalid(format!("signal.{} must be within 0..=100", name)));
            }
        }
        if !(self.spike_threshold_pct > 0.0) {
            return Err(invalid("signal.spike_threshold_pct must be > 0"));
        }
        if !(self.volume_multiplier > 0.0) {
            return Err(invalid("signal.volume_multiplier must be > 0"));
        }
        if self.volume_lookback == 0 {
            return Err(invalid("signal.volume_lookback must be >= 1"));
        }
        if !(self.atr_surge_multiplier > 0.0) {
            return Err(invalid("signal.atr_surge_multiplier must be > 0"));
        }

        let l = &self.levels;
        if !(l.stop_pct > 0.0 && l.take_pct > 0.0) {
            return Err(invalid("signal.levels percent offsets must be > 0"));
        }
        if !(l.atr_stop_multiplier > 0.0 && l.atr_take_multiplier > 0.0) {
            return Err(invalid("signal.levels ATR multipliers must be > 0"));
        }
        if let Some(leverage) = l.leverage {
            if !(leverage >= 1.0) {
                return Err(invalid("signal.levels.leverage must be >= 1"));
            }
        }
        if !(self.order_book.min_imbalance > 0.0) {
            return Err(invalid("signal.order_book.min_imbalance must be > 0"));
        }

        if self.has_overlapping_bands() {
            warn!(
                overbought = self.rsi_overbought,
                oversold = self.rsi_oversold,
                "RSI bands overlap; SHORT takes precedence when both directions match"
            );
        }
        if !(self.use_macd || self.use_kdj || self.use_spike || self.use_atr_surge) {
            warn!("no secondary confirmation enabled; no signal can fire");
        }

        Ok(())
    }

    pub fn has_overlapping_bands(&self) -> bool {
        self.rsi_oversold >= self.rsi_overbought
            || self.confirm_rsi_oversold >= self.confirm_rsi_overbought
    }
}

/// Alert deduplication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Same-direction repeats within this window are suppressed
    pub cooldown_secs: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        AlertConfig {
            cooldown_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    Telegram,
    Log,
}

/// Notification channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub sink: SinkKind,
    /// Loaded from TELEGRAM_BOT_TOKEN
    #[serde(skip_serializing)]
    pub telegram_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub telegram_chat_id: Option<String>,
    pub api_base: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_mode: Option<String>,
    pub disable_web_page_preview: bool,
    pub timeout_secs: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        NotifyConfig {
            sink: SinkKind::Log,
            telegram_token: None,
            telegram_chat_id: None,
            api_base: "https://api.telegram.org".to_string(),
            parse_mode: None,
            disable_web_page_preview: true,
            timeout_secs: 10,
        }
    }
}

impl NotifyConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_secs == 0 {
            return Err(invalid("notify.timeout_secs must be > 0"));
        }
        if self.sink == SinkKind::Telegram {
            if self.telegram_token.as_deref().map_or(true, str::is_empty) {
                return Err(invalid(format!(
                    "telegram sink selected but {} is not set",
                    ENV_TELEGRAM_TOKEN
                )));
            }
            if self.telegram_chat_id.as_deref().map_or(true, str::is_empty) {
                return Err(invalid(format!(
                    "telegram sink selected but {} is not set",
                    ENV_TELEGRAM_CHAT_ID
                )));
            }
        }
        Ok(())
    }
}
