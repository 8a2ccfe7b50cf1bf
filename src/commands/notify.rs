//! Notify-test command - send one message through the configured sink

use anyhow::{Context, Result};
use tracing::info;

use signal_scanner::notify::build_sink;

pub fn run(config_path: String, message: Option<String>) -> Result<()> {
    let config = super::load_config(&config_path)?;
    config
        .notify
        .validate()
        .context("Invalid notification configuration")?;

    let sink = build_sink(&config.notify).context("Failed to create notification sink")?;
    let message = message.unwrap_or_else(|| {
        format!(
            "Signal scanner test message ({} {})",
            config.exchange.venue, config.scan.interval
        )
    });

    let runtime = super::runtime()?;
    runtime
        .block_on(sink.send(&message))
        .with_context(|| format!("Failed to deliver test message via {}", sink.name()))?;

    info!("Test message delivered via {}", sink.name());
    Ok(())
}
