//! Binance futures wire types
//!
//! Typed envelopes for the depth stream and the REST depth endpoint. Prices
//! and quantities stay as strings on the wire to preserve venue precision;
//! the feed validator parses them into `Decimal` before they reach a book.

use serde::{Deserialize, Serialize};

/// A `[price, quantity]` pair as the venue sends it
pub type RawLevel = [String; 2];

/// Incremental depth diff from the `<symbol>@depth@100ms` stream
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DepthUpdateEvent {
    /// Event type (always "depthUpdate")
    #[serde(rename = "e")]
    pub event_type: String,

    /// Event time (milliseconds since Unix epoch)
    #[serde(rename = "E", default)]
    pub event_time: i64,

    /// Trading pair symbol (uppercase on the wire)
    #[serde(rename = "s")]
    pub symbol: String,

    /// First update ID covered by this diff
    #[serde(rename = "U")]
    pub first_update_id: i64,

    /// Final update ID covered by this diff
    #[serde(rename = "u")]
    pub final_update_id: i64,

    /// Bid changes; quantity "0" deletes the level
    #[serde(rename = "b")]
    pub bids: Vec<RawLevel>,

    /// Ask changes; quantity "0" deletes the level
    #[serde(rename = "a")]
    pub asks: Vec<RawLevel>,
}

/// Full depth snapshot from `GET /fapi/v1/depth`
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DepthSnapshot {
    pub last_update_id: i64,
    pub bids: Vec<RawLevel>,
    pub asks: Vec<RawLevel>,
}

/// Outbound stream subscription control frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeRequest {
    pub method: String,
    pub params: Vec<String>,
    pub id: u64,
}

impl SubscribeRequest {
    /// Build a SUBSCRIBE frame for one depth stream
    pub fn depth_stream(symbol: &str, id: u64) -> Self {
        Self {
            method: "SUBSCRIBE".to_string(),
            params: vec![format!("{}@depth@100ms", symbol.to_lowercase())],
            id,
        }
    }
}

/// Subscription acknowledgement (`result` is null on success)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamAck {
    pub result: Option<serde_json::Value>,
    pub id: u64,
}

/// Venue error payload
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamError {
    pub code: i64,
    pub msg: String,
}

/// Error envelope as delivered on the stream
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamErrorEnvelope {
    pub error: StreamError,
}

/// Every message the stream can deliver, discriminated by shape
///
/// Variant order matters: serde tries each in turn, and only a diff carries
/// the `U`/`u`/`b`/`a` fields.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StreamMessage {
    Depth(DepthUpdateEvent),
    Ack(StreamAck),
    Error(StreamErrorEnvelope),

    /// Any other event kind (debug-logged and ignored)
    Other(serde_json::Value),
}
