//! Scan command
//!
//! Runs the scan loop until Ctrl+C, or a single cycle with `--once`.

use anyhow::{Context, Result};
use std::sync::atomic::Ordering;
use tokio::sync::mpsc;
use tracing::{error, info};

use signal_scanner::notify::build_sink;
use signal_scanner::{Interval, ScanScheduler};

pub fn run(
    config_path: String,
    once: bool,
    interval: Option<String>,
    poll_secs: Option<u64>,
) -> Result<()> {
    let mut config = super::load_config(&config_path)?;

    if let Some(interval) = interval {
        config.scan.interval = interval
            .parse::<Interval>()
            .map_err(anyhow::Error::msg)
            .context("Invalid --interval")?;
    }
    if let Some(secs) = poll_secs {
        config.scan.poll_interval_secs = secs;
    }

    config.validate().context("Invalid configuration")?;

    let source = super::market_source(&config)?;
    let sink = build_sink(&config.notify).context("Failed to create notification sink")?;

    info!("╔══════════════════════════════════════════════════════════════╗");
    info!("║                    MARKET SIGNAL SCANNER                     ║");
    info!("╠══════════════════════════════════════════════════════════════╣");
    info!("║ Venue: {:<53} ║", config.exchange.venue);
    info!("║ Quote asset: {:<47} ║", config.exchange.quote_asset);
    info!(
        "║ Interval: {:<50} ║",
        match config.scan.confirm_interval {
            Some(confirm) => format!("{} (confirm {})", config.scan.interval, confirm),
            None => config.scan.interval.to_string(),
        }
    );
    info!("║ Cycle interval: {:<44} ║", format!("{} seconds", config.scan.poll_interval_secs));
    info!("║ Cooldown: {:<50} ║", format!("{} seconds", config.alerts.cooldown_secs));
    info!("║ Sink: {:<54} ║", sink.name());
    info!("╚══════════════════════════════════════════════════════════════╝");

    let scheduler = ScanScheduler::new(&config, source, sink);
    let runtime = super::runtime()?;

    if once {
        let report = runtime.block_on(scheduler.run_cycle());
        if report.skipped {
            anyhow::bail!("Symbol catalog unavailable, cycle skipped");
        }
        return Ok(());
    }

    runtime.block_on(async {
        let shutdown_flag = scheduler.shutdown_flag();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);

        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received Ctrl+C, initiating shutdown...");
                    shutdown_flag.store(true, Ordering::SeqCst);
                    let _ = shutdown_tx.send(()).await;
                }
                Err(e) => {
                    error!("Error setting up signal handler: {}", e);
                }
            }
        });

        scheduler.run(shutdown_rx).await;
    });

    info!("Scanner session ended.");
    Ok(())
}
