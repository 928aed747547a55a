//! Binance venue integration
//!
//! Wire types for the futures depth stream, the REST snapshot client, and
//! the WebSocket feed that drives the book registry.

pub mod client;
pub mod types;
pub mod websocket;

pub use client::BinanceClient;
pub use types::{DepthSnapshot, DepthUpdateEvent, StreamMessage, SubscribeRequest};
pub use websocket::{FeedStats, FeedStatsView, VenueFeed};
