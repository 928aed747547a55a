//! Configuration management
//!
//! All runtime configuration comes from the environment. Defaults target the
//! Binance USDⓈ-M futures venue.
//!
//! ## Environment Variables
//!
//! - `BINANCE_WS_URL`: Stream endpoint (default: wss://fstream.binance.com/ws)
//! - `BINANCE_REST_URL`: REST base for depth snapshots (default: https://fapi.binance.com)
//! - `TRADING_PAIRS`: Comma-separated lowercase symbols (default: btcusdt,ethusdt)
//! - `PORT`: HTTP/WebSocket listen port (default: 3000)
//! - `LOG_LEVEL`: Tracing filter directive (default: info)
//! - `ORDERBOOK_DEPTH`: Snapshot fetch depth limit (default: 1000)
//! - `BOOTSTRAP_MODE`: `stream` or `snapshot` (default: stream)

use crate::error::ConfigError;

/// How a freshly created book is aligned with the live diff stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapMode {
    /// Accept the first diff unconditionally and track continuity from there
    Stream,

    /// Fetch a REST depth snapshot and align buffered diffs against its
    /// `lastUpdateId` before applying the stream
    Snapshot,
}

/// Runtime configuration for the mirror process
#[derive(Debug, Clone)]
pub struct Config {
    /// WebSocket stream endpoint
    pub ws_url: String,

    /// REST base URL for depth snapshots
    pub rest_url: String,

    /// Tracked symbols, lowercase
    pub trading_pairs: Vec<String>,

    /// HTTP listen port
    pub port: u16,

    /// Tracing filter directive
    pub log_level: String,

    /// Depth limit passed to the snapshot endpoint
    pub orderbook_depth: u32,

    /// Book bootstrap strategy
    pub bootstrap_mode: BootstrapMode,
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when a numeric variable fails to parse, when
    /// `BOOTSTRAP_MODE` names an unknown mode, or when `TRADING_PAIRS` is
    /// set but contains no symbols.
    pub fn from_env() -> Result<Self, ConfigError> {
        let ws_url = std::env::var("BINANCE_WS_URL")
            .unwrap_or_else(|_| "wss://fstream.binance.com/ws".to_string());

        let rest_url = std::env::var("BINANCE_REST_URL")
            .unwrap_or_else(|_| "https://fapi.binance.com".to_string());

        let pairs_raw =
            std::env::var("TRADING_PAIRS").unwrap_or_else(|_| "btcusdt,ethusdt".to_string());
        let trading_pairs: Vec<String> = pairs_raw
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        if trading_pairs.is_empty() {
            return Err(ConfigError::NoTradingPairs);
        }

        let port = parse_env_var("PORT", "3000")?;
        let orderbook_depth = parse_env_var("ORDERBOOK_DEPTH", "1000")?;

        let log_level = std::env::var("LOG_LEVEL")
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or_else(|_| "info".to_string());

        let mode_raw = std::env::var("BOOTSTRAP_MODE").unwrap_or_else(|_| "stream".to_string());
        let bootstrap_mode = match mode_raw.to_lowercase().as_str() {
            "stream" => BootstrapMode::Stream,
            "snapshot" => BootstrapMode::Snapshot,
            _ => {
                return Err(ConfigError::InvalidValue {
                    var: "BOOTSTRAP_MODE".to_string(),
                    value: mode_raw,
                })
            }
        };

        Ok(Self {
            ws_url,
            rest_url,
            trading_pairs,
            port,
            log_level,
            orderbook_depth,
            bootstrap_mode,
        })
    }
}

fn parse_env_var<T: std::str::FromStr>(var: &str, default: &str) -> Result<T, ConfigError> {
    let raw = std::env::var(var).unwrap_or_else(|_| default.to_string());
    raw.parse().map_err(|_| ConfigError::InvalidValue {
        var: var.to_string(),
        value: raw,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    // Env-var tests mutate process state; keep them to a single test fn so
    // parallel test threads cannot interleave.
    #[test]
    fn test_from_env() {
        // SAFETY: Test-only code, no other thread touches these variables
        unsafe {
            std::env::remove_var("BINANCE_WS_URL");
            std::env::remove_var("BINANCE_REST_URL");
            std::env::remove_var("PORT");
            std::env::remove_var("ORDERBOOK_DEPTH");
            std::env::remove_var("BOOTSTRAP_MODE");
            std::env::set_var("TRADING_PAIRS", "BTCUSDT, ethusdt,");
        }

        let config = Config::from_env().expect("Failed to load config");
        assert_eq!(config.ws_url, "wss://fstream.binance.com/ws");
        assert_eq!(config.rest_url, "https://fapi.binance.com");
        assert_eq!(config.trading_pairs, vec!["btcusdt", "ethusdt"]);
        assert_eq!(config.port, 3000);
        assert_eq!(config.orderbook_depth, 1000);
        assert_eq!(config.bootstrap_mode, BootstrapMode::Stream);

        // SAFETY: As above
        unsafe {
            std::env::set_var("PORT", "not-a-port");
        }
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::InvalidValue { .. })
        ));

        // SAFETY: As above
        unsafe {
            std::env::set_var("PORT", "8080");
            std::env::set_var("BOOTSTRAP_MODE", "snapshot");
        }
        let config = Config::from_env().expect("Failed to load config");
        assert_eq!(config.port, 8080);
        assert_eq!(config.bootstrap_mode, BootstrapMode::Snapshot);

        // SAFETY: As above
        unsafe {
            std::env::set_var("TRADING_PAIRS", " , ");
        }
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::NoTradingPairs)
        ));

        // SAFETY: As above
        unsafe {
            std::env::remove_var("TRADING_PAIRS");
            std::env::remove_var("PORT");
            std::env::remove_var("BOOTSTRAP_MODE");
        }
    }
}
