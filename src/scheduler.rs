//! Periodic scan loop
//!
//! `Idle -> Listing -> Scanning(i) -> Sleeping -> Listing ...`, ending in
//! `Stopped` on shutdown. Each symbol runs an isolated pipeline (fetch,
//! compute, evaluate, dedup, notify); a failure is logged with the symbol and
//! error kind and the scan moves on.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::catalog::SymbolCatalog;
use crate::config::{Config, ScanConfig};
use crate::dedup::{Admission, AlertDeduplicator};
use crate::error::{ScanError, ScanResult};
use crate::exchange::MarketDataSource;
use crate::fetcher::MarketDataFetcher;
use crate::indicators::{completed_bars, IndicatorEngine, IndicatorError, IndicatorSet};
use crate::notify::{format_signal, NotificationSink};
use crate::signal::{PriceContext, SignalEvaluator};
use crate::types::{Candle, Interval, Symbol};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Listing,
    /// Index of the symbol most recently started
    Scanning(usize),
    Sleeping,
    Stopped,
}

/// Counters for one cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub cycle: u64,
    pub symbols: usize,
    pub evaluated: usize,
    pub signals: usize,
    pub notified: usize,
    pub suppressed: usize,
    pub delivery_failures: usize,
    pub failures: usize,
    /// Symbol listing failed and the cycle was skipped
    pub skipped: bool,
    /// Shutdown arrived before every symbol was started
    pub cancelled: bool,
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cycle {}: {} symbols, {} evaluated, {} signals, {} notified, {} suppressed, {} delivery failures, {} failures",
            self.cycle,
            self.symbols,
            self.evaluated,
            self.signals,
            self.notified,
            self.suppressed,
            self.delivery_failures,
            self.failures
        )
    }
}

/// What happened to one symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    NoSignal,
    Suppressed,
    Notified,
    DeliveryFailed,
}

pub struct ScanScheduler {
    catalog: SymbolCatalog,
    fetcher: Arc<MarketDataFetcher>,
    engine: IndicatorEngine,
    evaluator: SignalEvaluator,
    dedup: AlertDeduplicator,
    sink: Arc<dyn NotificationSink>,
    settings: ScanConfig,
    quote_asset: String,
    volume_lookback: usize,
    book_filter: bool,
    shutdown: Arc<AtomicBool>,
    state: watch::Sender<ScanState>,
    cycles: AtomicU64,
}

impl ScanScheduler {
    pub fn new(
        config: &Config,
        source: Arc<dyn MarketDataSource>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        let fetcher = Arc::new(MarketDataFetcher::new(source, &config.exchange));
        let (state, _) = watch::channel(ScanState::Idle);

        ScanScheduler {
            catalog: SymbolCatalog::new(fetcher.clone(), &config.exchange),
            fetcher,
            engine: IndicatorEngine::new(config.indicators.clone()),
            evaluator: SignalEvaluator::new(
                config.signal.clone(),
                config.scan.confirm_interval.is_some(),
            ),
            dedup: AlertDeduplicator::from_secs(config.alerts.cooldown_secs),
            sink,
            settings: config.scan.clone(),
            quote_asset: config.exchange.quote_asset.clone(),
            volume_lookback: config.signal.volume_lookback,
            book_filter: config.signal.order_book.enabled,
            shutdown: Arc::new(AtomicBool::new(false)),
            state,
            cycles: AtomicU64::new(0),
        }
    }

    /// Flag that stops the scan before the next symbol starts
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_stopping(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> ScanState {
        *self.state.borrow()
    }

    pub fn dedup(&self) -> &AlertDeduplicator {
        &self.dedup
    }

    fn set_state(&self, state: ScanState) {
        self.state.send_replace(state);
    }

    /// Run until `shutdown_rx` fires or the shutdown flag is set
    ///
    /// Returns the number of completed cycles.
    pub async fn run(&self, mut shutdown_rx: mpsc::Receiver<()>) -> u64 {
        let mut ticker = interval(Duration::from_secs(self.settings.poll_interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut completed = 0;

        info!(
            interval = %self.settings.interval,
            confirm = ?self.settings.confirm_interval,
            poll_secs = self.settings.poll_interval_secs,
            venue = self.fetcher.venue(),
            sink = self.sink.name(),
            "starting scan loop"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.is_stopping() {
                        break;
                    }
                    let report = self.run_cycle().await;
                    if !report.cancelled {
                        completed += 1;
                    }
                    if self.is_stopping() {
                        break;
                    }
                    self.set_state(ScanState::Sleeping);
                }
                Some(_) = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        self.stop();
        self.set_state(ScanState::Stopped);
        info!(cycles = completed, "scan loop stopped");
        completed
    }

    /// One pass over the symbol universe
    pub async fn run_cycle(&self) -> CycleReport {
        let cycle = self.cycles.fetch_add(1, Ordering::SeqCst) + 1;
        let mut report = CycleReport {
            cycle,
            ..CycleReport::default()
        };

        self.set_state(ScanState::Listing);
        let symbols = match self.catalog.list_symbols(&self.quote_asset).await {
            Ok(symbols) => symbols,
            Err(e) => {
                error!(kind = e.kind(), error = %e, cycle, "skipping cycle");
                report.skipped = true;
                self.set_state(ScanState::Idle);
                return report;
            }
        };
        report.symbols = symbols.len();
        debug!(cycle, count = symbols.len(), "scanning symbols");

        // The delay spaces symbol starts, also when several run at once
        let delay = Duration::from_millis(self.settings.symbol_delay_ms);
        let results: Vec<Option<(Symbol, ScanResult<Outcome>)>> = stream::iter(symbols.iter().cloned().enumerate())
            .then(|(i, symbol)| async move {
                if i > 0 && !delay.is_zero() {
                    sleep(delay).await;
                }
                (i, symbol)
            })
            .map(|(i, symbol)| async move {
                if self.is_stopping() {
                    return None;
                }
                self.set_state(ScanState::Scanning(i));
                let outcome = self.scan_symbol(&symbol).await;
                Some((symbol, outcome))
            })
            .buffer_unordered(self.settings.max_concurrency.max(1))
            .collect()
            .await;

        for result in results {
            match result {
                None => report.cancelled = true,
                Some((_, Ok(outcome))) => {
                    report.evaluated += 1;
                    match outcome {
                        Outcome::NoSignal => {}
                        Outcome::Suppressed => {
                            report.signals += 1;
                            report.suppressed += 1;
                        }
                        Outcome::Notified => {
                            report.signals += 1;
                            report.notified += 1;
                        }
                        Outcome::DeliveryFailed => {
                            report.signals += 1;
                            report.delivery_failures += 1;
                        }
                    }
                }
                Some((symbol, Err(e))) => {
                    report.failures += 1;
                    warn!(%symbol, kind = e.kind(), error = %e, "symbol scan failed");
                }
            }
        }

        if report.cancelled {
            warn!(cycle, "cycle cancelled by shutdown");
        }
        info!("{}", report);
        self.set_state(ScanState::Idle);
        report
    }

    async fn fetch_completed(&self, symbol: &Symbol, interval: Interval) -> ScanResult<Vec<Candle>> {
        let candles = self
            .fetcher
            .get_candles(symbol, interval, self.settings.candle_limit)
            .await?;
        if self.settings.use_incomplete_bar {
            return Ok(candles);
        }
        Ok(completed_bars(&candles, interval, Utc::now()).to_vec())
    }

    async fn scan_symbol(&self, symbol: &Symbol) -> ScanResult<Outcome> {
        let primary_candles = self.fetch_completed(symbol, self.settings.interval).await?;
        let confirm_candles = match self.settings.confirm_interval {
            Some(interval) => Some((interval, self.fetch_completed(symbol, interval).await?)),
            None => None,
        };
        let book = match self.book_filter {
            true => Some(
                self.fetcher
                    .get_order_book(symbol, self.settings.order_book_depth)
                    .await?,
            ),
            false => None,
        };

        let primary = self.engine.compute(self.settings.interval, &primary_candles);
        let confirm: Option<IndicatorSet> = confirm_candles
            .as_ref()
            .map(|(interval, candles)| self.engine.compute(*interval, candles));

        let mut ctx = PriceContext::from_candles(&primary_candles, self.volume_lookback).ok_or(
            ScanError::InsufficientHistory(IndicatorError::InsufficientHistory {
                indicator: "candles",
                required: 1,
                available: 0,
            }),
        )?;
        if let Some(book) = book {
            ctx = ctx.with_book(book);
        }

        let signal = self
            .evaluator
            .evaluate(symbol, &primary, confirm.as_ref(), &ctx);
        if !signal.direction.is_actionable() {
            return Ok(Outcome::NoSignal);
        }

        info!(
            %symbol,
            direction = %signal.direction,
            price = ctx.bar.close,
            triggers = ?signal.triggers,
            "signal"
        );

        let previous = match self.dedup.admit(symbol, &signal) {
            Admission::Send { previous } => previous,
            Admission::Suppressed => {
                debug!(%symbol, direction = %signal.direction, "suppressed by cooldown");
                return Ok(Outcome::Suppressed);
            }
        };

        match self.sink.send(&format_signal(&signal)).await {
            Ok(()) => Ok(Outcome::Notified),
            Err(e) => {
                // Back to the last delivered alert; the next cycle retries
                self.dedup.revert(symbol, previous);
                warn!(%symbol, kind = e.kind(), error = %e, "alert delivery failed");
                Ok(Outcome::DeliveryFailed)
            }
        }
    }
}
