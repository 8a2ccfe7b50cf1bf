//! Performance benchmarks for the signal scanner
//!
//! Run with: `cargo bench`
//! View results: `open target/criterion/report/index.html`

use chrono::{Duration, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

use signal_scanner::config::SignalConfig;
use signal_scanner::indicators::{self, IndicatorEngine};
use signal_scanner::{Candle, Interval, PriceContext, SignalEvaluator, Symbol};

/// Oscillating series so every indicator has something to chew on
fn sample_candles(count: usize) -> Vec<Candle> {
    let start = Utc::now() - Duration::minutes(15 * (count as i64 + 2));
    (0..count)
        .map(|i| {
            let x = i as f64;
            let close = 100.0 + (x * 0.3).sin() * 5.0 + x * 0.01;
            let open = close - (x * 0.7).cos();
            Candle {
                open_time: start + Duration::minutes(15 * i as i64),
                open,
                high: open.max(close) + 0.5,
                low: open.min(close) - 0.5,
                close,
                volume: 1000.0 + (x * 0.5).sin().abs() * 500.0,
            }
        })
        .collect()
}

fn benchmark_indicators(c: &mut Criterion) {
    let candles = sample_candles(200);
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let engine = IndicatorEngine::new(Default::default());

    c.bench_function("rsi_14", |b| {
        b.iter(|| indicators::rsi(black_box(&closes), 14))
    });
    c.bench_function("indicator_engine_compute_200", |b| {
        b.iter(|| engine.compute(Interval::M15, black_box(&candles)))
    });
}

fn benchmark_evaluation(c: &mut Criterion) {
    let candles = sample_candles(200);
    let engine = IndicatorEngine::new(Default::default());
    let set = engine.compute(Interval::M15, &candles);
    let evaluator = SignalEvaluator::new(SignalConfig::default(), false);
    let symbol = Symbol::new("BTCUSDT");

    c.bench_function("evaluate_symbol", |b| {
        b.iter(|| {
            let ctx = PriceContext::from_candles(black_box(&candles), 10);
            ctx.map(|ctx| evaluator.evaluate(&symbol, &set, None, &ctx))
        })
    });
}

criterion_group!(benches, benchmark_indicators, benchmark_evaluation);
criterion_main!(benches);
