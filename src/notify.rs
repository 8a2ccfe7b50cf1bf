//! Alert delivery
//!
//! - `TelegramSink`: Bot API `sendMessage`
//! - `LogSink`: dry run, writes alerts to the log

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::common::clip_body;
use crate::config::{NotifyConfig, SinkKind};
use crate::error::{ScanError, ScanResult};
use crate::indicators::keys;
use crate::types::{Direction, Signal};

#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(&self, message: &str) -> ScanResult<()>;
}

/// Telegram Bot API sink
pub struct TelegramSink {
    client: Client,
    api_base: String,
    token: String,
    chat_id: String,
    parse_mode: Option<String>,
    disable_web_page_preview: bool,
}

impl TelegramSink {
    pub fn from_config(config: &NotifyConfig) -> ScanResult<Self> {
        let token = config
            .telegram_token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ScanError::Config("telegram token missing".into()))?;
        let chat_id = config
            .telegram_chat_id
            .clone()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ScanError::Config("telegram chat id missing".into()))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ScanError::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(TelegramSink {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token,
            chat_id,
            parse_mode: config.parse_mode.clone(),
            disable_web_page_preview: config.disable_web_page_preview,
        })
    }
}

#[async_trait]
impl NotificationSink for TelegramSink {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn send(&self, message: &str) -> ScanResult<()> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.token);

        let mut payload = json!({
            "chat_id": self.chat_id,
            "text": message,
            "disable_web_page_preview": self.disable_web_page_preview,
        });
        if let Some(mode) = &self.parse_mode {
            payload["parse_mode"] = json!(mode);
        }

        // Strip the URL from transport errors: it carries the bot token
        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ScanError::DeliveryError(e.without_url().to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ScanError::DeliveryError(format!(
                "telegram HTTP {}: {}",
                status.as_u16(),
                clip_body(&body)
            )));
        }

        debug!(chat_id = %self.chat_id, "telegram message delivered");
        Ok(())
    }
}

/// Writes alerts to the log instead of sending them
#[derive(Debug, Default, Clone)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send(&self, message: &str) -> ScanResult<()> {
        info!(target: "alerts", "\n{}", message);
        Ok(())
    }
}

pub fn build_sink(config: &NotifyConfig) -> ScanResult<Arc<dyn NotificationSink>> {
    Ok(match config.sink {
        SinkKind::Telegram => Arc::new(TelegramSink::from_config(config)?),
        SinkKind::Log => Arc::new(LogSink),
    })
}

fn fmt_price(price: f64) -> String {
    let abs = price.abs();
    if abs >= 100.0 {
        format!("{:.2}", price)
    } else if abs >= 1.0 {
        format!("{:.4}", price)
    } else {
        format!("{:.8}", price)
    }
}

/// Plain-text alert for a signal
pub fn format_signal(signal: &Signal) -> String {
    let marker = match signal.direction {
        Direction::Long => "🟢",
        Direction::Short => "🔴",
        Direction::None => "⚪",
    };

    let mut lines = vec![format!(
        "{} {} {} ({})",
        marker, signal.direction, signal.symbol, signal.interval
    )];

    if let Some(levels) = &signal.levels {
        lines.push(format!("Entry: {}", fmt_price(levels.entry)));
        lines.push(format!("Stop loss: {}", fmt_price(levels.stop_loss)));
        lines.push(format!("Take profit: {}", fmt_price(levels.take_profit)));
        if let Some(liq) = levels.liquidation {
            lines.push(format!("Liquidation (est.): {}", fmt_price(liq)));
        }
    }

    if !signal.triggers.is_empty() {
        let labels: Vec<&str> = signal.triggers.iter().map(|t| t.label()).collect();
        lines.push(format!("Triggers: {}", labels.join(", ")));
    }

    let shown = [
        (keys::RSI, "RSI"),
        ("confirm_rsi", "HTF RSI"),
        (keys::KDJ_J, "J"),
        (keys::MACD_HIST, "MACD hist"),
        (keys::ATR, "ATR"),
        ("change_pct", "Δ%"),
        ("volume_ratio", "Vol×"),
    ];
    let values: Vec<String> = shown
        .iter()
        .filter_map(|(key, label)| {
            signal
                .indicators
                .get(*key)
                .map(|v| format!("{} {:.2}", label, v))
        })
        .collect();
    if !values.is_empty() {
        lines.push(values.join(" | "));
    }

    lines.push(format!("Bar: {}", signal.timestamp.format("%Y-%m-%d %H:%M UTC")));
    lines.join("\n")
}
