//! Integration tests for the signal scanner
//!
//! Drive the scheduler end to end with in-memory market data and sinks.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use signal_scanner::exchange::{MarketDataSource, SourceError};
use signal_scanner::indicators::{self, keys, IndicatorEngine};
use signal_scanner::{
    BookLevel, Candle, Config, Direction, Interval, NotificationSink, OrderBookSnapshot, PriceContext,
    ScanError, ScanResult, ScanScheduler, ScanState, SignalEvaluator, Symbol, Trigger,
};

// =============================================================================
// Test Utilities
// =============================================================================

/// Completed candles moving `step` per bar, closing at the extreme of each bar
fn trending_candles(count: usize, base_price: f64, step: f64, interval: Interval) -> Vec<Candle> {
    let bar = interval.duration();
    let start = Utc::now() - bar * (count as i32 + 2);

    (0..count)
        .map(|i| {
            let close = base_price + step * i as f64;
            let open = close - step * 0.5;
            let (high, low) = if step >= 0.0 {
                (close, close - step.abs())
            } else {
                (close + step.abs(), close)
            };
            Candle {
                open_time: start + bar * i as i32,
                open,
                high,
                low,
                close,
                volume: 1000.0,
            }
        })
        .collect()
}

#[derive(Default)]
struct MockSource {
    listing: Vec<Symbol>,
    listing_down: AtomicBool,
    candles: HashMap<(Symbol, Interval), Vec<Candle>>,
    failing: HashSet<Symbol>,
    books: HashMap<Symbol, OrderBookSnapshot>,
}

impl MockSource {
    fn with_symbol(mut self, symbol: &str, interval: Interval, candles: Vec<Candle>) -> Self {
        let symbol = Symbol::new(symbol);
        if !self.listing.contains(&symbol) {
            self.listing.push(symbol.clone());
        }
        self.candles.insert((symbol, interval), candles);
        self
    }

    fn with_book(mut self, symbol: &str, bid: (f64, f64), ask: (f64, f64)) -> Self {
        let symbol = Symbol::new(symbol);
        let book = OrderBookSnapshot {
            symbol: symbol.clone(),
            timestamp: Utc::now(),
            bids: vec![BookLevel { price: bid.0, size: bid.1 }],
            asks: vec![BookLevel { price: ask.0, size: ask.1 }],
        };
        self.books.insert(symbol, book);
        self
    }

    fn with_failing(mut self, symbol: &str) -> Self {
        let symbol = Symbol::new(symbol);
        self.listing.push(symbol.clone());
        self.failing.insert(symbol);
        self
    }
}

#[async_trait]
impl MarketDataSource for MockSource {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn list_symbols(&self, _quote_asset: &str) -> Result<Vec<Symbol>, SourceError> {
        if self.listing_down.load(Ordering::SeqCst) {
            return Err(SourceError::Status {
                status: 503,
                body: "maintenance".into(),
            });
        }
        Ok(self.listing.clone())
    }

    async fn candles(
        &self,
        symbol: &Symbol,
        interval: Interval,
        _limit: u32,
    ) -> Result<Vec<Candle>, SourceError> {
        if self.failing.contains(symbol) {
            return Err(SourceError::Status {
                status: 503,
                body: "unavailable".into(),
            });
        }
        self.candles
            .get(&(symbol.clone(), interval))
            .cloned()
            .ok_or(SourceError::UnsupportedInterval(interval))
    }

    async fn order_book(
        &self,
        symbol: &Symbol,
        _depth: u32,
    ) -> Result<OrderBookSnapshot, SourceError> {
        self.books
            .get(symbol)
            .cloned()
            .ok_or_else(|| SourceError::Malformed("no book".into()))
    }
}

#[derive(Default)]
struct RecordingSink {
    messages: Mutex<Vec<String>>,
    failing: AtomicBool,
}

impl RecordingSink {
    fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn send(&self, message: &str) -> ScanResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ScanError::DeliveryError("chat not found".into()));
        }
        self.messages.lock().unwrap().push(message.to_string());
        Ok(())
    }
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.exchange.max_retries = 2;
    config.exchange.retry_backoff_ms = 1;
    config.exchange.rate_limit = 1000;
    config.scan.confirm_interval = None;
    config.scan.symbol_delay_ms = 0;
    config.scan.poll_interval_secs = 3600;
    config.signal.use_spike = false;
    config
}

fn three_symbol_source() -> MockSource {
    MockSource::default()
        .with_symbol("AUSDT", Interval::M15, trending_candles(60, 100.0, 1.0, Interval::M15))
        .with_failing("BUSDT")
        .with_symbol("CUSDT", Interval::M15, trending_candles(60, 200.0, -1.0, Interval::M15))
}

// =============================================================================
// Scheduler Tests
// =============================================================================

#[tokio::test]
async fn test_failing_symbol_does_not_stop_cycle() {
    let sink = Arc::new(RecordingSink::default());
    let scheduler = ScanScheduler::new(&test_config(), Arc::new(three_symbol_source()), sink.clone());

    let report = scheduler.run_cycle().await;

    assert_eq!(report.symbols, 3);
    assert_eq!(report.evaluated, 2);
    assert_eq!(report.failures, 1);
    assert_eq!(report.signals, 2);
    assert_eq!(report.notified, 2);
    assert!(!report.cancelled);
    assert_eq!(scheduler.state(), ScanState::Idle);

    let messages = sink.messages();
    assert_eq!(messages.len(), 2);
    assert!(messages.iter().any(|m| m.contains("SHORT AUSDT")));
    assert!(messages.iter().any(|m| m.contains("LONG CUSDT")));
}

#[tokio::test]
async fn test_repeat_signals_suppressed_across_cycles() {
    let sink = Arc::new(RecordingSink::default());
    let scheduler = ScanScheduler::new(&test_config(), Arc::new(three_symbol_source()), sink.clone());

    let first = scheduler.run_cycle().await;
    let second = scheduler.run_cycle().await;

    assert_eq!(first.notified, 2);
    assert_eq!(second.cycle, 2);
    assert_eq!(second.signals, 2);
    assert_eq!(second.notified, 0);
    assert_eq!(second.suppressed, 2);
    assert_eq!(sink.messages().len(), 2);
    assert_eq!(
        scheduler.dedup().last(&Symbol::new("AUSDT")).map(|s| s.direction),
        Some(Direction::Short)
    );
}

#[tokio::test]
async fn test_delivery_failure_is_contained_and_retried() {
    let sink = Arc::new(RecordingSink::default());
    sink.failing.store(true, Ordering::SeqCst);
    let scheduler = ScanScheduler::new(&test_config(), Arc::new(three_symbol_source()), sink.clone());

    let report = scheduler.run_cycle().await;
    assert_eq!(report.delivery_failures, 2);
    assert_eq!(report.failures, 1);
    assert!(scheduler.dedup().is_empty());

    // Transport back: the next cycle delivers instead of suppressing
    sink.failing.store(false, Ordering::SeqCst);
    let report = scheduler.run_cycle().await;
    assert_eq!(report.notified, 2);
    assert_eq!(report.suppressed, 0);
}

#[tokio::test]
async fn test_catalog_unavailable_skips_cycle() {
    let source = three_symbol_source();
    source.listing_down.store(true, Ordering::SeqCst);
    let sink = Arc::new(RecordingSink::default());
    let scheduler = ScanScheduler::new(&test_config(), Arc::new(source), sink.clone());

    let report = scheduler.run_cycle().await;
    assert!(report.skipped);
    assert_eq!(report.symbols, 0);
    assert!(sink.messages().is_empty());
}

#[tokio::test]
async fn test_short_history_yields_no_signal() {
    let source = MockSource::default().with_symbol(
        "NEWUSDT",
        Interval::M15,
        trending_candles(10, 1.0, 0.01, Interval::M15),
    );
    let sink = Arc::new(RecordingSink::default());
    let scheduler = ScanScheduler::new(&test_config(), Arc::new(source), sink.clone());

    let report = scheduler.run_cycle().await;
    assert_eq!(report.evaluated, 1);
    assert_eq!(report.signals, 0);
    assert_eq!(report.failures, 0);
}

#[tokio::test]
async fn test_confirm_interval_required() {
    let mut config = test_config();
    config.scan.confirm_interval = Some(Interval::H1);

    let source = MockSource::default()
        .with_symbol("AUSDT", Interval::M15, trending_candles(60, 100.0, 1.0, Interval::M15))
        .with_symbol("AUSDT", Interval::H1, trending_candles(60, 50.0, 0.5, Interval::H1))
        // No H1 data: confirmation fetch fails for this symbol only
        .with_symbol("CUSDT", Interval::M15, trending_candles(60, 200.0, -1.0, Interval::M15));
    let sink = Arc::new(RecordingSink::default());
    let scheduler = ScanScheduler::new(&config, Arc::new(source), sink.clone());

    let report = scheduler.run_cycle().await;
    assert_eq!(report.notified, 1);
    assert_eq!(report.failures, 1);

    let messages = sink.messages();
    assert!(messages[0].contains("SHORT AUSDT"));
    assert!(messages[0].contains(Trigger::ConfirmRsiOverbought.label()));
}

#[tokio::test]
async fn test_stopped_scheduler_cancels_cycle() {
    let sink = Arc::new(RecordingSink::default());
    let scheduler = ScanScheduler::new(&test_config(), Arc::new(three_symbol_source()), sink.clone());

    scheduler.stop();
    let report = scheduler.run_cycle().await;

    assert!(report.cancelled);
    assert_eq!(report.evaluated, 0);
    assert!(sink.messages().is_empty());
}

#[tokio::test]
async fn test_run_loop_stops_on_shutdown() {
    let sink = Arc::new(RecordingSink::default());
    let scheduler = Arc::new(ScanScheduler::new(
        &test_config(),
        Arc::new(three_symbol_source()),
        sink.clone(),
    ));
    let (tx, rx) = mpsc::channel::<()>(1);

    let runner = scheduler.clone();
    let handle = tokio::spawn(async move { runner.run(rx).await });

    tokio::time::sleep(Duration::from_millis(200)).await;
    tx.send(()).await.unwrap();

    let cycles = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cycles, 1);
    assert_eq!(scheduler.state(), ScanState::Stopped);
    assert!(scheduler.is_stopping());
    assert_eq!(sink.messages().len(), 2);
}

/// `count` symbols alternating between an uptrend (SHORT) and a downtrend (LONG)
fn alternating_source(count: usize) -> MockSource {
    (0..count).fold(MockSource::default(), |source, i| {
        let step = if i % 2 == 0 { 1.0 } else { -1.0 };
        source.with_symbol(
            &format!("S{}USDT", i),
            Interval::M15,
            trending_candles(60, 200.0, step, Interval::M15),
        )
    })
}

#[tokio::test]
async fn test_concurrent_scan_notifies_each_symbol_once() {
    let mut config = test_config();
    config.scan.max_concurrency = 4;

    let sink = Arc::new(RecordingSink::default());
    let scheduler = ScanScheduler::new(&config, Arc::new(alternating_source(8)), sink.clone());

    let report = scheduler.run_cycle().await;
    assert_eq!(report.symbols, 8);
    assert_eq!(report.evaluated, 8);
    assert_eq!(report.signals, 8);
    assert_eq!(report.notified, 8);
    assert_eq!(report.failures, 0);
    assert_eq!(scheduler.dedup().len(), 8);

    let messages = sink.messages();
    assert_eq!(messages.len(), 8);
    for i in 0..8 {
        let symbol = format!(" S{}USDT ", i);
        assert_eq!(messages.iter().filter(|m| m.contains(&symbol)).count(), 1, "{}", symbol);
    }

    let again = scheduler.run_cycle().await;
    assert_eq!(again.suppressed, 8);
    assert_eq!(again.notified, 0);
    assert_eq!(sink.messages().len(), 8);
}

#[tokio::test]
async fn test_symbol_delay_spaces_concurrent_starts() {
    let mut config = test_config();
    config.scan.max_concurrency = 4;
    config.scan.symbol_delay_ms = 50;

    let sink = Arc::new(RecordingSink::default());
    let scheduler = ScanScheduler::new(&config, Arc::new(alternating_source(4)), sink.clone());

    let start = Instant::now();
    let report = scheduler.run_cycle().await;

    // Starts at 0, 50, 100 and 150 ms
    assert!(start.elapsed() >= Duration::from_millis(150));
    assert_eq!(report.notified, 4);
}

#[tokio::test]
async fn test_order_book_filter_end_to_end() {
    let mut config = test_config();
    config.signal.order_book.enabled = true;

    let source = MockSource::default()
        // Uptrend (SHORT) with asks outweighing bids: passes
        .with_symbol("AUSDT", Interval::M15, trending_candles(60, 100.0, 1.0, Interval::M15))
        .with_book("AUSDT", (158.9, 1.0), (159.0, 3.0))
        // Downtrend (LONG) with asks outweighing bids: filtered out
        .with_symbol("CUSDT", Interval::M15, trending_candles(60, 200.0, -1.0, Interval::M15))
        .with_book("CUSDT", (141.0, 1.0), (141.1, 3.0))
        // No book: the fetch fails for this symbol only
        .with_symbol("DUSDT", Interval::M15, trending_candles(60, 100.0, 1.0, Interval::M15));
    let sink = Arc::new(RecordingSink::default());
    let scheduler = ScanScheduler::new(&config, Arc::new(source), sink.clone());

    let report = scheduler.run_cycle().await;
    assert_eq!(report.symbols, 3);
    assert_eq!(report.evaluated, 2);
    assert_eq!(report.failures, 1);
    assert_eq!(report.signals, 1);
    assert_eq!(report.notified, 1);

    let messages = sink.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("SHORT AUSDT"));
    assert!(messages[0].contains(Trigger::BookImbalance.label()));
    assert!(scheduler.dedup().last(&Symbol::new("DUSDT")).is_none());
}

#[tokio::test]
async fn test_missing_book_is_data_unavailable() {
    let config = test_config();
    let source = MockSource::default().with_symbol(
        "DUSDT",
        Interval::M15,
        trending_candles(60, 100.0, 1.0, Interval::M15),
    );
    let fetcher = signal_scanner::MarketDataFetcher::new(Arc::new(source), &config.exchange);

    let err = fetcher.get_order_book(&Symbol::new("DUSDT"), 5).await.unwrap_err();
    assert_eq!(err.kind(), "data_unavailable");
    assert!(matches!(err, ScanError::DataUnavailable { ref symbol, .. } if symbol.as_str() == "DUSDT"));
}

// =============================================================================
// Evaluation Pipeline Tests
// =============================================================================

#[test]
fn test_rsi_of_rising_closes_feeds_no_signal_without_bearish_macd() {
    let closes: Vec<f64> = (100..120).map(f64::from).collect();
    assert_eq!(indicators::rsi(&closes, 14).unwrap(), 100.0);

    let candles = trending_candles(20, 100.0, 1.0, Interval::M15);
    let engine = IndicatorEngine::new(Default::default());
    let mut set = engine.compute(Interval::M15, &candles);
    assert_eq!(set.get(keys::RSI).unwrap(), 100.0);
    // Uptrend: MACD sits above its signal line
    set.insert(keys::MACD, 0.8);
    set.insert(keys::MACD_SIGNAL, 0.5);

    let mut config = test_config().signal;
    config.rsi_overbought = 85.0;
    config.use_kdj = false;
    let evaluator = SignalEvaluator::new(config, false);
    let ctx = PriceContext::from_candles(&candles, 10).unwrap();

    let signal = evaluator.evaluate(&Symbol::new("BTCUSDT"), &set, None, &ctx);
    assert_eq!(signal.direction, Direction::None);
}
