//! Crate error types
//!
//! One enum per failure domain: configuration loading and the upstream venue
//! feed (WebSocket stream + REST snapshot). Query-surface errors live in
//! `server::error` where they map onto HTTP status codes.

use thiserror::Error;

/// Errors raised while loading configuration from the environment
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value}")]
    InvalidValue { var: String, value: String },

    #[error("No trading pairs configured (TRADING_PAIRS is empty)")]
    NoTradingPairs,
}

/// Errors raised by the venue feed (WebSocket stream and REST snapshots)
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Snapshot rejected for {symbol}: {reason}")]
    SnapshotRejected { symbol: String, reason: String },

    #[error("Reconnect attempts exhausted after {0} tries")]
    ReconnectExhausted(u32),
}

impl FeedError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FeedError::Connection(_) | FeedError::RateLimit(_))
    }
}

impl From<reqwest::Error> for FeedError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FeedError::Connection("Snapshot request timed out".to_string())
        } else if err.is_connect() {
            FeedError::Connection("Failed to connect to Binance REST API".to_string())
        } else if let Some(status) = err.status() {
            match status.as_u16() {
                429 => FeedError::RateLimit(
                    "Too many requests to Binance REST API. Retry after 60 seconds.".to_string(),
                ),
                418 => FeedError::Connection("IP address banned by Binance".to_string()),
                403 => FeedError::Connection("WAF limit violated".to_string()),
                500..=599 => FeedError::Connection(format!(
                    "Binance server error (HTTP {})",
                    status.as_u16()
                )),
                _ => FeedError::Connection(format!("HTTP error: {}", status)),
            }
        } else {
            FeedError::Connection(err.to_string())
        }
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(err: serde_json::Error) -> Self {
        FeedError::Parse(format!("JSON parsing failed: {}", err))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for FeedError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        FeedError::Connection(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FeedError>;
