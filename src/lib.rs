//! Market Signal Scanner
//!
//! Periodically scans an exchange's symbol universe, computes technical
//! indicators on public candle data, evaluates a configurable RSI-based rule
//! set with secondary confirmations, and sends at most one deduplicated
//! alert per symbol per cycle.
//!
//! # Exchange adapters
//! - **Binance** (default) and **MEXC** spot: `/api/v3` klines, depth, exchangeInfo
//! - **Bitget** USDT-M futures: `/api/v2/mix/market`
//!
//! Only public market data endpoints are used; no API key required.
//!
//! ## Example
//! ```no_run
//! use signal_scanner::exchange::build_source;
//! use signal_scanner::notify::LogSink;
//! use signal_scanner::{Config, ScanScheduler};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     let source = build_source(config.exchange.venue, None, Duration::from_secs(10))?;
//!     let scheduler = ScanScheduler::new(&config, source, Arc::new(LogSink));
//!     let report = scheduler.run_cycle().await;
//!     println!("{}", report);
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod common;
pub mod config;
pub mod dedup;
pub mod error;
pub mod exchange;
pub mod fetcher;
pub mod indicators;
pub mod notify;
pub mod scheduler;
pub mod signal;
pub mod types;

pub use catalog::SymbolCatalog;
pub use config::Config;
pub use dedup::AlertDeduplicator;
pub use error::{ScanError, ScanResult};
pub use fetcher::MarketDataFetcher;
pub use indicators::{IndicatorEngine, IndicatorSet};
pub use notify::NotificationSink;
pub use scheduler::{CycleReport, ScanScheduler, ScanState};
pub use signal::{PriceContext, SignalEvaluator};
pub use types::*;
