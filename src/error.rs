//! Scanner error taxonomy
//!
//! Every variant except [`ScanError::Config`] is recoverable: the scheduler
//! contains it at the symbol or cycle level and keeps scanning.

use thiserror::Error;

use crate::config::ConfigError;
use crate::exchange::SourceError;
use crate::indicators::IndicatorError;
use crate::types::Symbol;

#[derive(Debug, Error)]
pub enum ScanError {
    /// Symbol listing failed; the cycle is skipped
    #[error("symbol catalog unavailable: {0}")]
    CatalogUnavailable(String),

    /// A symbol's market data could not be fetched after retries
    #[error("market data unavailable for {symbol}: {reason}")]
    DataUnavailable { symbol: Symbol, reason: String },

    #[error(transparent)]
    InsufficientHistory(#[from] IndicatorError),

    /// Notification transport failed
    #[error("notification delivery failed: {0}")]
    DeliveryError(String),

    /// Invalid or missing startup configuration (fatal)
    #[error("configuration error: {0}")]
    Config(String),
}

impl ScanError {
    /// Short machine-friendly name used in structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            ScanError::CatalogUnavailable(_) => "catalog_unavailable",
            ScanError::DataUnavailable { .. } => "data_unavailable",
            ScanError::InsufficientHistory(_) => "insufficient_history",
            ScanError::DeliveryError(_) => "delivery_error",
            ScanError::Config(_) => "config",
        }
    }

    pub fn data_unavailable(symbol: &Symbol, err: &SourceError) -> Self {
        ScanError::DataUnavailable {
            symbol: symbol.clone(),
            reason: err.to_string(),
        }
    }
}

impl From<ConfigError> for ScanError {
    fn from(err: ConfigError) -> Self {
        ScanError::Config(err.to_string())
    }
}

pub type ScanResult<T> = Result<T, ScanError>;
