//! Venue feed client
//!
//! Maintains the upstream WebSocket connection, performs the subscription
//! handshake for every configured symbol, validates inbound frames and hands
//! depth diffs to the registry. Disconnects reconnect with exponential
//! backoff up to a fixed attempt cap; a successful open resets the counter.
//!
//! Two bootstrap strategies are supported (see `BootstrapMode`): `stream`
//! lets the registry adopt the first diff unconditionally, `snapshot` aligns
//! each book against a REST depth snapshot before applying diffs.

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::time::{interval, sleep, Duration, Instant, MissedTickBehavior};
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};

use crate::binance::client::BinanceClient;
use crate::binance::types::{DepthUpdateEvent, StreamMessage, SubscribeRequest};
use crate::config::{BootstrapMode, Config};
use crate::error::FeedError;
use crate::orderbook::registry::BookRegistry;
use crate::orderbook::validate::is_valid_diff_update;

/// Reconnect attempts before giving up
const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// First reconnect delay; doubles per attempt
const RECONNECT_BASE_DELAY_MS: u64 = 1000;

/// Grace period between the socket opening and the subscription handshake
const SUBSCRIBE_DELAY: Duration = Duration::from_secs(2);

/// Pacing between per-symbol book creation, avoiding a snapshot
/// thundering-herd right after startup
const BOOK_INIT_PACING: Duration = Duration::from_millis(100);

/// Application-level ping cadence
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// A connection with no inbound frames for this long is considered half-open
const READ_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Sequence gap past which a synced book is realigned via snapshot refetch
/// (snapshot bootstrap mode only; in stream mode the registry adopts the jump)
const SNAPSHOT_REFETCH_GAP: i64 = 1000;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Feed counters shared with the query surface
#[derive(Debug, Default)]
pub struct FeedStats {
    connected: AtomicBool,
    ever_connected: AtomicBool,
    reconnect_attempts: AtomicU32,
    messages_received: AtomicU64,
    last_message_time: AtomicI64,
    snapshots_fetched: AtomicU64,
}

impl FeedStats {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn ever_connected(&self) -> bool {
        self.ever_connected.load(Ordering::Relaxed)
    }

    pub fn view(&self) -> FeedStatsView {
        let last = self.last_message_time.load(Ordering::Relaxed);
        FeedStatsView {
            connected: self.is_connected(),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            snapshots_fetched: self.snapshots_fetched.load(Ordering::Relaxed),
            last_message_age_ms: (last > 0)
                .then(|| chrono::Utc::now().timestamp_millis() - last),
        }
    }
}

/// Serializable projection of `FeedStats`
#[derive(Debug, Clone, Serialize)]
pub struct FeedStatsView {
    pub connected: bool,
    pub reconnect_attempts: u32,
    pub messages_received: u64,
    pub snapshots_fetched: u64,
    pub last_message_age_ms: Option<i64>,
}

/// Per-symbol alignment state for snapshot bootstrap mode
enum SyncState {
    /// Waiting for a snapshot; the next diff triggers the fetch
    Pending,
    /// Snapshot applied, diffs flow through the continuity check
    Synced,
}

/// Connection-scoped state, rebuilt on every reconnect
struct ConnState {
    sync: HashMap<String, SyncState>,
    pending_subs: HashMap<u64, String>,
}

/// Upstream feed client for the configured symbol set
pub struct VenueFeed {
    ws_url: String,
    symbols: Vec<String>,
    bootstrap_mode: BootstrapMode,
    snapshot_depth: u32,
    registry: Arc<BookRegistry>,
    client: Arc<BinanceClient>,
    stats: Arc<FeedStats>,
    next_request_id: AtomicU64,
}

impl VenueFeed {
    pub fn new(
        config: &Config,
        registry: Arc<BookRegistry>,
        client: Arc<BinanceClient>,
    ) -> Self {
        Self {
            ws_url: config.ws_url.clone(),
            symbols: config.trading_pairs.clone(),
            bootstrap_mode: config.bootstrap_mode,
            snapshot_depth: config.orderbook_depth,
            registry,
            client,
            stats: Arc::new(FeedStats::default()),
            next_request_id: AtomicU64::new(1),
        }
    }

    pub fn stats(&self) -> Arc<FeedStats> {
        Arc::clone(&self.stats)
    }

    /// Create an empty book for every configured symbol before connecting
    pub async fn initialize_books(&self) {
        for symbol in &self.symbols {
            self.registry.ensure_book(symbol).await;
            info!(symbol = %symbol, "Order book initialized");
            sleep(BOOK_INIT_PACING).await;
        }
    }

    /// Drive the connection until the reconnect budget is exhausted
    pub async fn run(&self) -> Result<(), FeedError> {
        loop {
            match self.connect_and_stream().await {
                Ok(()) => info!("Venue stream closed"),
                Err(e) => warn!(error = %e, "Venue stream terminated"),
            }
            self.stats.connected.store(false, Ordering::Relaxed);

            let attempt = self.stats.reconnect_attempts.fetch_add(1, Ordering::Relaxed) + 1;
            if attempt > MAX_RECONNECT_ATTEMPTS {
                error!(
                    attempts = MAX_RECONNECT_ATTEMPTS,
                    "Reconnect attempts exhausted, feed stopped"
                );
                return Err(FeedError::ReconnectExhausted(MAX_RECONNECT_ATTEMPTS));
            }

            let delay_ms = RECONNECT_BASE_DELAY_MS * 2u64.pow(attempt - 1);
            warn!(attempt, delay_ms, "Reconnecting to venue stream");
            sleep(Duration::from_millis(delay_ms)).await;
        }
    }

    /// One connection lifetime: open, subscribe, stream until close or error
    async fn connect_and_stream(&self) -> Result<(), FeedError> {
        info!(url = %self.ws_url, "Connecting to venue stream");
        let (ws_stream, _) = connect_async(&self.ws_url).await?;
        info!("Venue stream connected");

        self.stats.connected.store(true, Ordering::Relaxed);
        self.stats.ever_connected.store(true, Ordering::Relaxed);
        self.stats.reconnect_attempts.store(0, Ordering::Relaxed);

        let (mut write, mut read) = ws_stream.split();

        // Let the venue settle before the handshake
        sleep(SUBSCRIBE_DELAY).await;
        let pending_subs = self.subscribe_all(&mut write).await?;

        let mut conn = ConnState {
            sync: match self.bootstrap_mode {
                BootstrapMode::Snapshot => self
                    .symbols
                    .iter()
                    .map(|s| (s.clone(), SyncState::Pending))
                    .collect(),
                BootstrapMode::Stream => HashMap::new(),
            },
            pending_subs,
        };

        let mut ping_timer = interval(PING_INTERVAL);
        ping_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_activity = Instant::now();

        loop {
            tokio::select! {
                _ = ping_timer.tick() => {
                    if last_activity.elapsed() > READ_IDLE_TIMEOUT {
                        return Err(FeedError::Connection(
                            "no frames within read-idle timeout".to_string(),
                        ));
                    }
                    write.send(Message::Ping(Vec::new().into())).await?;
                }
                msg = read.next() => {
                    let Some(msg) = msg else {
                        return Ok(());
                    };
                    last_activity = Instant::now();
                    match msg? {
                        Message::Text(text) => self.handle_text(&text, &mut conn).await,
                        Message::Ping(data) => write.send(Message::Pong(data)).await?,
                        Message::Pong(_) => debug!("Received pong"),
                        Message::Close(frame) => {
                            info!(frame = ?frame, "Close frame received");
                            return Ok(());
                        }
                        Message::Binary(_) => warn!("Unexpected binary message"),
                        Message::Frame(_) => {}
                    }
                }
            }
        }
    }

    /// Send one SUBSCRIBE control frame per configured symbol
    async fn subscribe_all(&self, write: &mut WsSink) -> Result<HashMap<u64, String>, FeedError> {
        let mut pending = HashMap::new();
        for symbol in &self.symbols {
            let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
            let request = SubscribeRequest::depth_stream(symbol, id);
            let stream = request.params[0].clone();

            write
                .send(Message::Text(serde_json::to_string(&request)?.into()))
                .await?;
            debug!(stream = %stream, id, "Subscription requested");
            pending.insert(id, stream);
        }
        Ok(pending)
    }

    async fn handle_text(&self, text: &str, conn: &mut ConnState) {
        self.stats.messages_received.fetch_add(1, Ordering::Relaxed);
        self.stats
            .last_message_time
            .store(chrono::Utc::now().timestamp_millis(), Ordering::Relaxed);

        match serde_json::from_str::<StreamMessage>(text) {
            Ok(StreamMessage::Depth(diff)) => {
                if !is_valid_diff_update(&diff) {
                    warn!(symbol = %diff.symbol, "Malformed depth diff discarded");
                    return;
                }
                let symbol = diff.symbol.to_lowercase();
                match self.bootstrap_mode {
                    BootstrapMode::Stream => {
                        self.registry.apply_diff(&symbol, &diff).await;
                    }
                    BootstrapMode::Snapshot => {
                        self.apply_aligned(&symbol, &diff, conn).await;
                    }
                }
            }
            Ok(StreamMessage::Ack(ack)) => match conn.pending_subs.remove(&ack.id) {
                Some(stream) => info!(stream = %stream, id = ack.id, "Subscription confirmed"),
                None => debug!(id = ack.id, "Acknowledgement for unknown request"),
            },
            Ok(StreamMessage::Error(envelope)) => {
                error!(
                    code = envelope.error.code,
                    msg = %envelope.error.msg,
                    "Venue error"
                );
            }
            Ok(StreamMessage::Other(value)) => {
                let kind = value
                    .get("e")
                    .and_then(|e| e.as_str())
                    .unwrap_or("unknown");
                debug!(event = %kind, "Ignoring stream event");
            }
            Err(e) => warn!(error = %e, "Malformed frame discarded"),
        }
    }

    /// Snapshot-mode apply: align the book against a REST snapshot before
    /// letting diffs through, and refetch after a large sequence gap
    async fn apply_aligned(&self, symbol: &str, diff: &DepthUpdateEvent, conn: &mut ConnState) {
        let state = conn
            .sync
            .entry(symbol.to_string())
            .or_insert(SyncState::Pending);

        if matches!(state, SyncState::Synced) {
            let current = self.registry.last_update_id(symbol).await.unwrap_or(0);
            if current > 0 && diff.first_update_id - current > SNAPSHOT_REFETCH_GAP {
                warn!(
                    symbol = %symbol,
                    last_update_id = current,
                    first_update_id = diff.first_update_id,
                    "Large sequence gap, scheduling snapshot refetch"
                );
                *state = SyncState::Pending;
            }
        }

        match state {
            SyncState::Synced => {
                self.registry.apply_diff(symbol, diff).await;
            }
            SyncState::Pending => {
                let snapshot = match self
                    .client
                    .get_depth_snapshot(symbol, self.snapshot_depth)
                    .await
                {
                    Ok(snapshot) => snapshot,
                    Err(e) => {
                        warn!(
                            symbol = %symbol,
                            error = %e,
                            "Snapshot fetch failed, retrying on next diff"
                        );
                        return;
                    }
                };

                if !self.registry.apply_snapshot(symbol, &snapshot).await {
                    warn!(symbol = %symbol, "Snapshot rejected, retrying on next diff");
                    return;
                }
                self.stats.snapshots_fetched.fetch_add(1, Ordering::Relaxed);

                // Align the triggering diff against the snapshot id:
                // discard if entirely stale, apply if it covers id+1,
                // otherwise keep refetching
                if diff.final_update_id <= snapshot.last_update_id {
                    debug!(
                        symbol = %symbol,
                        final_update_id = diff.final_update_id,
                        snapshot_id = snapshot.last_update_id,
                        "Diff predates snapshot, discarded"
                    );
                    *state = SyncState::Synced;
                } else if diff.first_update_id <= snapshot.last_update_id + 1 {
                    self.registry.apply_diff(symbol, diff).await;
                    *state = SyncState::Synced;
                } else {
                    warn!(
                        symbol = %symbol,
                        first_update_id = diff.first_update_id,
                        snapshot_id = snapshot.last_update_id,
                        "Diff does not align with snapshot, refetching"
                    );
                }
            }
        }
    }
}
