//! HTTP and WebSocket read surfaces
//!
//! Builds the axum router over the shared registry state and serves it with
//! graceful shutdown. The query surface is request/response; `/ws` upgrades
//! into the push surface.

pub mod error;
pub mod handlers;
pub mod ws;

use axum::response::IntoResponse;
use axum::{routing::get, Router};
use std::net::SocketAddr;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use error::ApiError;
pub use handlers::AppState;

/// Convert a handler panic into the standard 500 envelope
fn panic_to_response(err: Box<dyn std::any::Any + Send + 'static>) -> axum::response::Response {
    let detail = if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic in request handler".to_string()
    };
    ApiError::Internal(detail).into_response()
}

/// Assemble the full route table
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/orderbooks", get(handlers::all_orderbooks))
        .route("/api/orderbooks/{symbol}", get(handlers::orderbook))
        .route(
            "/api/orderbooks/{symbol}/limit/{n}",
            get(handlers::orderbook_limit),
        )
        .route(
            "/api/orderbooks/{symbol}/acc-qty/{price}",
            get(handlers::accumulated_quantity),
        )
        .route(
            "/api/orderbooks/{symbol}/market-impact/{size}",
            get(handlers::market_impact),
        )
        .route(
            "/api/orderbooks/{symbol}/liquidity-profile",
            get(handlers::liquidity_profile),
        )
        .route("/api/stats", get(handlers::stats))
        .route("/ws", get(ws::ws_handler))
        .layer(cors)
        .layer(CatchPanicLayer::custom(panic_to_response))
        .with_state(state)
}

/// Bind and serve until the shutdown future resolves
pub async fn serve(
    port: u16,
    state: AppState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = build_router(state);
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");
    info!("Query surface: GET http://{}/api/orderbooks", addr);
    info!("Push surface:  ws://{}/ws", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("HTTP server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binance::websocket::FeedStats;
    use crate::orderbook::registry::BookRegistry;
    use std::sync::Arc;

    #[test]
    fn test_router_builds() {
        let state = AppState::new(
            Arc::new(BookRegistry::new()),
            Arc::new(FeedStats::default()),
        );
        let _router = build_router(state);
    }

    #[test]
    fn test_panic_maps_to_internal_error_response() {
        let response = panic_to_response(Box::new("lock poisoned"));
        assert_eq!(response.status(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);

        let response = panic_to_response(Box::new("boom".to_string()));
        assert_eq!(response.status(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    }
}
