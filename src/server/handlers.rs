//! Query-surface handlers
//!
//! Stateless projections of the registry into reply payloads. Every data
//! endpoint resolves the symbol case-insensitively, validates numeric
//! parameters before touching a book, and wraps the result in the
//! `{success, data, timestamp}` envelope.

use axum::extract::{Path, Query, State};
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use crate::binance::websocket::{FeedStats, FeedStatsView};
use crate::orderbook::book::{
    AccumulatedToPrice, AccumulationSide, BookSnapshot, LiquidityProfile, MarketImpact,
    TradeSide,
};
use crate::orderbook::registry::{BookRegistry, BookSummary, RegistryStats};
use crate::server::error::{ApiError, Result};

/// Book data older than this marks the service degraded
const STALENESS_THRESHOLD_MS: i64 = 10_000;

/// Liquidity profile depth bounds
const MAX_PROFILE_LEVELS: usize = 100;
const DEFAULT_PROFILE_LEVELS: usize = 10;

/// Shared state for the query and push surfaces
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<BookRegistry>,
    pub feed_stats: Arc<FeedStats>,
    pub started_at: i64,
}

impl AppState {
    pub fn new(registry: Arc<BookRegistry>, feed_stats: Arc<FeedStats>) -> Self {
        Self {
            registry,
            feed_stats,
            started_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    fn uptime_seconds(&self) -> i64 {
        (chrono::Utc::now().timestamp_millis() - self.started_at) / 1000
    }
}

/// Standard data-endpoint envelope
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    pub data: T,
    pub timestamp: i64,
}

impl<T> Envelope<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data,
            timestamp: chrono::Utc::now().timestamp_millis(),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: i64,
    pub uptime: i64,
    pub orderbooks: Vec<BookSummary>,
    pub binance: FeedStatsView,
}

#[derive(Debug, Serialize)]
pub struct ProcessStats {
    pub uptime_seconds: i64,
    pub started_at: i64,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub registry: RegistryStats,
    pub books: Vec<BookSummary>,
    pub binance: FeedStatsView,
    pub process: ProcessStats,
}

#[derive(Debug, Deserialize)]
pub struct AccQtyParams {
    pub side: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MarketImpactParams {
    pub side: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProfileParams {
    pub levels: Option<String>,
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let orderbooks = state.registry.book_summaries().await;
    let binance = state.feed_stats.view();

    let all_empty = orderbooks
        .iter()
        .all(|b| b.bid_levels == 0 && b.ask_levels == 0);
    let stale = orderbooks
        .iter()
        .any(|b| b.age_ms > STALENESS_THRESHOLD_MS);

    let status = if !state.feed_stats.ever_connected() && all_empty {
        "error"
    } else if !binance.connected || stale {
        "degraded"
    } else {
        "ok"
    };

    Json(HealthResponse {
        status,
        timestamp: chrono::Utc::now().timestamp_millis(),
        uptime: state.uptime_seconds(),
        orderbooks,
        binance,
    })
}

/// GET /api/orderbooks
pub async fn all_orderbooks(
    State(state): State<AppState>,
) -> Json<Envelope<HashMap<String, BookSnapshot>>> {
    Envelope::ok(state.registry.all_snapshots(None).await)
}

/// GET /api/orderbooks/{symbol}
pub async fn orderbook(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<Envelope<BookSnapshot>>> {
    let snapshot = state
        .registry
        .get_snapshot(&symbol, None)
        .await
        .ok_or_else(|| ApiError::NotFound(symbol.to_lowercase()))?;
    Ok(Envelope::ok(snapshot))
}

/// GET /api/orderbooks/{symbol}/limit/{n}
pub async fn orderbook_limit(
    State(state): State<AppState>,
    Path((symbol, n)): Path<(String, String)>,
) -> Result<Json<Envelope<BookSnapshot>>> {
    let limit = parse_positive_usize(&n, "limit")?;
    let snapshot = state
        .registry
        .get_snapshot(&symbol, Some(limit))
        .await
        .ok_or_else(|| ApiError::NotFound(symbol.to_lowercase()))?;
    Ok(Envelope::ok(snapshot))
}

/// GET /api/orderbooks/{symbol}/acc-qty/{price}?side=bids|asks|both
pub async fn accumulated_quantity(
    State(state): State<AppState>,
    Path((symbol, price)): Path<(String, String)>,
    Query(params): Query<AccQtyParams>,
) -> Result<Json<Envelope<AccumulatedToPrice>>> {
    let target = parse_positive_decimal(&price, "price")?;
    let side = match params.side.as_deref() {
        None => AccumulationSide::Both,
        Some(raw) => AccumulationSide::from_str(raw).map_err(ApiError::BadRequest)?,
    };

    let result = state
        .registry
        .with_book(&symbol, |book| book.accumulated_to_price(target, side))
        .await
        .ok_or_else(|| ApiError::NotFound(symbol.to_lowercase()))?;
    Ok(Envelope::ok(result))
}

/// GET /api/orderbooks/{symbol}/market-impact/{size}?side=buy|sell
pub async fn market_impact(
    State(state): State<AppState>,
    Path((symbol, size)): Path<(String, String)>,
    Query(params): Query<MarketImpactParams>,
) -> Result<Json<Envelope<MarketImpact>>> {
    let order_size = parse_positive_decimal(&size, "size")?;
    let side = params
        .side
        .as_deref()
        .ok_or_else(|| ApiError::BadRequest("missing side parameter".to_string()))
        .and_then(|raw| TradeSide::from_str(raw).map_err(ApiError::BadRequest))?;

    let impact = state
        .registry
        .with_book(&symbol, |book| book.market_impact(order_size, side))
        .await
        .ok_or_else(|| ApiError::NotFound(symbol.to_lowercase()))?
        // The book returns None only for non-positive sizes
        .ok_or_else(|| ApiError::BadRequest("size must be positive".to_string()))?;
    Ok(Envelope::ok(impact))
}

/// GET /api/orderbooks/{symbol}/liquidity-profile?levels=1..100
pub async fn liquidity_profile(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Query(params): Query<ProfileParams>,
) -> Result<Json<Envelope<LiquidityProfile>>> {
    let levels = match params.levels.as_deref() {
        None => DEFAULT_PROFILE_LEVELS,
        Some(raw) => {
            let levels = parse_positive_usize(raw, "levels")?;
            if levels > MAX_PROFILE_LEVELS {
                return Err(ApiError::BadRequest(format!(
                    "levels must be between 1 and {}",
                    MAX_PROFILE_LEVELS
                )));
            }
            levels
        }
    };

    let profile = state
        .registry
        .with_book(&symbol, |book| book.liquidity_profile(levels))
        .await
        .ok_or_else(|| ApiError::NotFound(symbol.to_lowercase()))?;
    Ok(Envelope::ok(profile))
}

/// GET /api/stats
pub async fn stats(State(state): State<AppState>) -> Json<Envelope<StatsResponse>> {
    Envelope::ok(StatsResponse {
        registry: state.registry.stats().await,
        books: state.registry.book_summaries().await,
        binance: state.feed_stats.view(),
        process: ProcessStats {
            uptime_seconds: state.uptime_seconds(),
            started_at: state.started_at,
        },
    })
}

fn parse_positive_decimal(raw: &str, name: &str) -> Result<Decimal> {
    let value = Decimal::from_str(raw)
        .map_err(|_| ApiError::BadRequest(format!("invalid {}: {}", name, raw)))?;
    if value <= Decimal::ZERO {
        return Err(ApiError::BadRequest(format!(
            "{} must be positive, got {}",
            name, raw
        )));
    }
    Ok(value)
}

fn parse_positive_usize(raw: &str, name: &str) -> Result<usize> {
    let value: usize = raw
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid {}: {}", name, raw)))?;
    if value == 0 {
        return Err(ApiError::BadRequest(format!("{} must be positive", name)));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_positive_decimal() {
        assert_eq!(
            parse_positive_decimal("50000.5", "price").unwrap(),
            Decimal::from_str("50000.5").unwrap()
        );
        assert!(parse_positive_decimal("0", "price").is_err());
        assert!(parse_positive_decimal("-1", "price").is_err());
        assert!(parse_positive_decimal("NaN", "price").is_err());
        assert!(parse_positive_decimal("abc", "price").is_err());
    }

    #[test]
    fn test_parse_positive_usize() {
        assert_eq!(parse_positive_usize("10", "limit").unwrap(), 10);
        assert!(parse_positive_usize("0", "limit").is_err());
        assert!(parse_positive_usize("-5", "limit").is_err());
        assert!(parse_positive_usize("3.5", "limit").is_err());
    }

    #[tokio::test]
    async fn test_health_status_transitions() {
        let registry = Arc::new(BookRegistry::new());
        let stats = Arc::new(FeedStats::default());
        let state = AppState::new(Arc::clone(&registry), Arc::clone(&stats));

        // Never connected, no data: error
        let response = health(State(state.clone())).await;
        assert_eq!(response.0.status, "error");

        // Data present but feed disconnected: degraded
        registry.ensure_book("btcusdt").await;
        let diff = crate::binance::types::DepthUpdateEvent {
            event_type: "depthUpdate".to_string(),
            event_time: 0,
            symbol: "BTCUSDT".to_string(),
            first_update_id: 1,
            final_update_id: 2,
            bids: vec![["50000".to_string(), "1".to_string()]],
            asks: vec![],
        };
        registry.apply_diff("btcusdt", &diff).await;
        let response = health(State(state)).await;
        assert_eq!(response.0.status, "degraded");
    }
}
