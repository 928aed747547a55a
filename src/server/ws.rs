//! Push surface: streaming subscribers
//!
//! Each WebSocket client gets a welcome frame, an initial snapshot of every
//! book, and then every post-apply book update the registry broadcasts. A
//! writer task drains the subscriber's registry channel into the socket;
//! the reader loop answers ping and one-shot subscribe frames. There is no
//! per-symbol filtering: all subscribers receive all updates.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::orderbook::book::BookSnapshot;
use crate::server::handlers::AppState;

/// Frames pushed to subscribers; `type` is the discriminant
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushFrame {
    Welcome {
        message: String,
        timestamp: i64,
    },
    OrderbooksSnapshot {
        data: HashMap<String, BookSnapshot>,
        timestamp: i64,
    },
    OrderbookUpdate {
        symbol: String,
        data: BookSnapshot,
        timestamp: i64,
    },
    Pong {
        timestamp: i64,
    },
}

/// Control frames accepted from subscribers
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    Ping,
    Subscribe { symbol: String },
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// GET /ws upgrade entry point
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (subscriber_id, mut updates) = state.registry.subscribe().await;
    info!(subscriber_id, "Push subscriber connected");

    let (mut sink, mut stream) = socket.split();

    let welcome = PushFrame::Welcome {
        message: "Connected to order book mirror".to_string(),
        timestamp: now_millis(),
    };
    let initial = PushFrame::OrderbooksSnapshot {
        data: state.registry.all_snapshots(None).await,
        timestamp: now_millis(),
    };
    if send_frame(&mut sink, &welcome).await.is_err()
        || send_frame(&mut sink, &initial).await.is_err()
    {
        state.registry.unsubscribe(subscriber_id).await;
        return;
    }

    // Replies from the reader loop merge with registry broadcasts in the
    // writer task, which owns the sink
    let (reply_tx, mut reply_rx) = mpsc::channel::<PushFrame>(16);

    let writer = tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                update = updates.recv() => match update {
                    Some(update) => PushFrame::OrderbookUpdate {
                        symbol: update.symbol,
                        data: update.snapshot,
                        timestamp: now_millis(),
                    },
                    None => break,
                },
                reply = reply_rx.recv() => match reply {
                    Some(frame) => frame,
                    None => break,
                },
            };
            if send_frame(&mut sink, &frame).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                handle_client_frame(&text, &reply_tx, &state).await;
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(subscriber_id, error = %e, "Subscriber socket error");
                break;
            }
        }
    }

    writer.abort();
    state.registry.unsubscribe(subscriber_id).await;
    info!(subscriber_id, "Push subscriber disconnected");
}

async fn handle_client_frame(text: &str, reply_tx: &mpsc::Sender<PushFrame>, state: &AppState) {
    let frame = match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => frame,
        Err(e) => {
            debug!(error = %e, "Unrecognized subscriber frame ignored");
            return;
        }
    };

    match frame {
        ClientFrame::Ping => {
            let _ = reply_tx
                .send(PushFrame::Pong {
                    timestamp: now_millis(),
                })
                .await;
        }
        ClientFrame::Subscribe { symbol } => {
            match state.registry.get_snapshot(&symbol, None).await {
                Some(snapshot) => {
                    let _ = reply_tx
                        .send(PushFrame::OrderbookUpdate {
                            symbol: symbol.to_lowercase(),
                            data: snapshot,
                            timestamp: now_millis(),
                        })
                        .await;
                }
                None => warn!(symbol = %symbol, "Subscribe request for unknown symbol"),
            }
        }
    }
}

async fn send_frame(
    sink: &mut SplitSink<WebSocket, Message>,
    frame: &PushFrame,
) -> Result<(), axum::Error> {
    let json = serde_json::to_string(frame).map_err(axum::Error::new)?;
    sink.send(Message::Text(json.into())).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn test_push_frame_serialization() {
        let frame = PushFrame::Pong { timestamp: 123 };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "pong");
        assert_eq!(json["timestamp"], 123);

        let frame = PushFrame::Welcome {
            message: "hi".to_string(),
            timestamp: 1,
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "welcome");

        let snapshot = BookSnapshot {
            symbol: "btcusdt".to_string(),
            last_update_id: 5,
            last_update_time: 1,
            bids: vec![],
            asks: vec![],
            spread: Some(Decimal::ONE),
            mid_price: None,
            total_bids: 0,
            total_asks: 0,
        };
        let frame = PushFrame::OrderbookUpdate {
            symbol: "btcusdt".to_string(),
            data: snapshot,
            timestamp: 2,
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "orderbook_update");
        assert_eq!(json["symbol"], "btcusdt");
        assert_eq!(json["data"]["last_update_id"], 5);
    }

    #[test]
    fn test_client_frame_parsing() {
        assert!(matches!(
            serde_json::from_str::<ClientFrame>(r#"{"type":"ping"}"#).unwrap(),
            ClientFrame::Ping
        ));
        match serde_json::from_str::<ClientFrame>(r#"{"type":"subscribe","symbol":"btcusdt"}"#)
            .unwrap()
        {
            ClientFrame::Subscribe { symbol } => assert_eq!(symbol, "btcusdt"),
            other => panic!("unexpected frame: {:?}", other),
        }
        assert!(serde_json::from_str::<ClientFrame>(r#"{"type":"order"}"#).is_err());
    }
}
