//! Book registry and subscriber fan-out
//!
//! Owns every per-symbol book and the set of streaming subscribers. All
//! mutations flow through `apply_diff`/`apply_snapshot`, which keeps the
//! single-writer discipline: the ingestion task serializes writes, the query
//! surface takes brief shared reads, and broadcasts go out via per-subscriber
//! channels using try_send so a slow reader can never stall ingestion.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

use crate::binance::types::{DepthSnapshot, DepthUpdateEvent, RawLevel};
use crate::orderbook::book::{BookSnapshot, OrderBook};
use crate::orderbook::validate::{is_valid_snapshot, sanitize_price_level, sequence_ok};

/// Sequence gap beyond which a diff is treated as a resync instead of a drop
const RESYNC_GAP_THRESHOLD: i64 = 1000;

/// Outbound queue depth per subscriber; a subscriber that falls this far
/// behind is dropped
const SUBSCRIBER_QUEUE_DEPTH: usize = 64;

/// Post-apply book state pushed to streaming subscribers
#[derive(Debug, Clone)]
pub struct BookUpdate {
    pub symbol: String,
    pub snapshot: BookSnapshot,
}

/// Registry counters for `/api/stats`
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub books: usize,
    pub subscribers: usize,
    pub diffs_applied: u64,
    pub diffs_dropped: u64,
    pub resyncs: u64,
    pub broadcasts: u64,
    pub invalid_levels: u64,
}

/// Per-book summary for `/api/stats` and `/health`
#[derive(Debug, Clone, Serialize)]
pub struct BookSummary {
    pub symbol: String,
    pub bid_levels: usize,
    pub ask_levels: usize,
    pub last_update_id: i64,
    pub last_update_time: i64,
    pub age_ms: i64,
}

/// Symbol → book map plus the streaming subscriber set
pub struct BookRegistry {
    books: RwLock<HashMap<String, OrderBook>>,
    subscribers: RwLock<HashMap<u64, mpsc::Sender<BookUpdate>>>,
    next_subscriber_id: AtomicU64,
    diffs_applied: AtomicU64,
    diffs_dropped: AtomicU64,
    resyncs: AtomicU64,
    broadcasts: AtomicU64,
    invalid_levels: AtomicU64,
}

impl BookRegistry {
    pub fn new() -> Self {
        Self {
            books: RwLock::new(HashMap::new()),
            subscribers: RwLock::new(HashMap::new()),
            next_subscriber_id: AtomicU64::new(1),
            diffs_applied: AtomicU64::new(0),
            diffs_dropped: AtomicU64::new(0),
            resyncs: AtomicU64::new(0),
            broadcasts: AtomicU64::new(0),
            invalid_levels: AtomicU64::new(0),
        }
    }

    /// Create an empty book for the symbol if none exists
    pub async fn ensure_book(&self, symbol: &str) {
        let symbol = symbol.to_lowercase();
        let mut books = self.books.write().await;
        books
            .entry(symbol.clone())
            .or_insert_with(|| OrderBook::new(symbol));
    }

    /// Apply a validated depth diff to the symbol's book
    ///
    /// Returns true when the book was mutated. Three branches, keyed by the
    /// book's `last_update_id`:
    /// 1. uninitialized (0): bootstrap from the stream, accept unconditionally
    /// 2. gap > threshold: resync, accept-and-adopt with a warning
    /// 3. otherwise: require diff continuity, drop on failure
    ///
    /// A successful apply broadcasts the post-apply snapshot exactly once.
    pub async fn apply_diff(&self, symbol: &str, diff: &DepthUpdateEvent) -> bool {
        let symbol = symbol.to_lowercase();
        let update = {
            let mut books = self.books.write().await;
            let book = books
                .entry(symbol.clone())
                .or_insert_with(|| OrderBook::new(symbol.clone()));

            let last_id = book.last_update_id;
            if last_id == 0 {
                debug!(
                    symbol = %symbol,
                    final_update_id = diff.final_update_id,
                    "Bootstrapping book from first stream diff"
                );
            } else {
                let gap = diff.first_update_id - last_id;
                if gap > RESYNC_GAP_THRESHOLD {
                    warn!(
                        symbol = %symbol,
                        last_update_id = last_id,
                        first_update_id = diff.first_update_id,
                        gap,
                        "Large sequence gap, resyncing to stream"
                    );
                    self.resyncs.fetch_add(1, Ordering::Relaxed);
                } else if !sequence_ok(last_id, diff.first_update_id, diff.final_update_id) {
                    warn!(
                        symbol = %symbol,
                        last_update_id = last_id,
                        first_update_id = diff.first_update_id,
                        final_update_id = diff.final_update_id,
                        "Out-of-sequence diff dropped"
                    );
                    self.diffs_dropped.fetch_add(1, Ordering::Relaxed);
                    return false;
                }
            }

            self.apply_changes(book, &diff.bids, &diff.asks);
            book.update_last_update_id(diff.final_update_id);
            self.diffs_applied.fetch_add(1, Ordering::Relaxed);

            BookUpdate {
                symbol: symbol.clone(),
                snapshot: book.snapshot(None),
            }
        };

        self.broadcast(update).await;
        true
    }

    /// Replace the symbol's book with a full snapshot
    ///
    /// Returns false (and leaves the book untouched) for an invalid snapshot.
    /// Snapshot applies do not broadcast; broadcasts are diff-driven.
    pub async fn apply_snapshot(&self, symbol: &str, snap: &DepthSnapshot) -> bool {
        if !is_valid_snapshot(snap) {
            warn!(symbol = %symbol, "Invalid depth snapshot rejected");
            return false;
        }

        let symbol = symbol.to_lowercase();
        let mut books = self.books.write().await;
        let book = books
            .entry(symbol.clone())
            .or_insert_with(|| OrderBook::new(symbol.clone()));

        book.clear();
        self.apply_changes(book, &snap.bids, &snap.asks);
        book.update_last_update_id(snap.last_update_id);

        debug!(
            symbol = %symbol,
            last_update_id = snap.last_update_id,
            bid_levels = book.total_bids(),
            ask_levels = book.total_asks(),
            "Applied depth snapshot"
        );
        true
    }

    fn apply_changes(&self, book: &mut OrderBook, bids: &[RawLevel], asks: &[RawLevel]) {
        for raw in bids {
            match sanitize_price_level(raw) {
                Some((price, quantity)) => book.add_bid(price, quantity, 1),
                None => {
                    self.invalid_levels.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        for raw in asks {
            match sanitize_price_level(raw) {
                Some((price, quantity)) => book.add_ask(price, quantity, 1),
                None => {
                    self.invalid_levels.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    /// Push a book update to every subscriber, dropping any whose channel is
    /// closed or full
    async fn broadcast(&self, update: BookUpdate) {
        let mut subscribers = self.subscribers.write().await;
        if subscribers.is_empty() {
            return;
        }

        subscribers.retain(|id, tx| match tx.try_send(update.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(subscriber_id = id, "Subscriber queue full, dropping subscriber");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(subscriber_id = id, "Subscriber channel closed, removing");
                false
            }
        });
        self.broadcasts.fetch_add(1, Ordering::Relaxed);
    }

    /// Register a streaming subscriber; returns its id and the update channel
    pub async fn subscribe(&self) -> (u64, mpsc::Receiver<BookUpdate>) {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_DEPTH);
        self.subscribers.write().await.insert(id, tx);
        (id, rx)
    }

    pub async fn unsubscribe(&self, id: u64) {
        self.subscribers.write().await.remove(&id);
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// Run a read-only query against one book
    pub async fn with_book<R>(
        &self,
        symbol: &str,
        f: impl FnOnce(&OrderBook) -> R,
    ) -> Option<R> {
        let books = self.books.read().await;
        books.get(&symbol.to_lowercase()).map(f)
    }

    pub async fn last_update_id(&self, symbol: &str) -> Option<i64> {
        self.with_book(symbol, |book| book.last_update_id).await
    }

    pub async fn get_snapshot(
        &self,
        symbol: &str,
        limit: Option<usize>,
    ) -> Option<BookSnapshot> {
        self.with_book(symbol, |book| book.snapshot(limit)).await
    }

    pub async fn all_snapshots(&self, limit: Option<usize>) -> HashMap<String, BookSnapshot> {
        let books = self.books.read().await;
        books
            .iter()
            .map(|(symbol, book)| (symbol.clone(), book.snapshot(limit)))
            .collect()
    }

    pub async fn symbols(&self) -> Vec<String> {
        let books = self.books.read().await;
        let mut symbols: Vec<String> = books.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    pub async fn book_summaries(&self) -> Vec<BookSummary> {
        let now = chrono::Utc::now().timestamp_millis();
        let books = self.books.read().await;
        let mut summaries: Vec<BookSummary> = books
            .values()
            .map(|book| BookSummary {
                symbol: book.symbol.clone(),
                bid_levels: book.total_bids(),
                ask_levels: book.total_asks(),
                last_update_id: book.last_update_id,
                last_update_time: book.last_update_time,
                age_ms: now - book.last_update_time,
            })
            .collect();
        summaries.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        summaries
    }

    pub async fn stats(&self) -> RegistryStats {
        RegistryStats {
            books: self.books.read().await.len(),
            subscribers: self.subscribers.read().await.len(),
            diffs_applied: self.diffs_applied.load(Ordering::Relaxed),
            diffs_dropped: self.diffs_dropped.load(Ordering::Relaxed),
            resyncs: self.resyncs.load(Ordering::Relaxed),
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
            invalid_levels: self.invalid_levels.load(Ordering::Relaxed),
        }
    }
}

impl Default for BookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn raw(price: &str, qty: &str) -> [String; 2] {
        [price.to_string(), qty.to_string()]
    }

    fn diff(first: i64, last: i64, bids: Vec<[String; 2]>, asks: Vec<[String; 2]>) -> DepthUpdateEvent {
        DepthUpdateEvent {
            event_type: "depthUpdate".to_string(),
            event_time: 0,
            symbol: "BTCUSDT".to_string(),
            first_update_id: first,
            final_update_id: last,
            bids,
            asks,
        }
    }

    #[tokio::test]
    async fn test_bootstrap_accepts_first_diff() {
        let registry = BookRegistry::new();
        registry.ensure_book("btcusdt").await;

        let accepted = registry
            .apply_diff("btcusdt", &diff(500, 510, vec![raw("50000", "1.5")], vec![]))
            .await;

        assert!(accepted);
        assert_eq!(registry.last_update_id("btcusdt").await, Some(510));
        let snap = registry.get_snapshot("btcusdt", None).await.unwrap();
        assert_eq!(snap.bids.len(), 1);
    }

    #[tokio::test]
    async fn test_sequence_acceptance_and_rejection() {
        let registry = BookRegistry::new();
        registry
            .apply_diff("btcusdt", &diff(100, 100, vec![raw("50000", "1")], vec![]))
            .await;
        assert_eq!(registry.last_update_id("btcusdt").await, Some(100));

        // U=101, u=105 covers current+1 → accepted
        assert!(
            registry
                .apply_diff("btcusdt", &diff(101, 105, vec![raw("50001", "2")], vec![]))
                .await
        );
        assert_eq!(registry.last_update_id("btcusdt").await, Some(105));

        // U=103, u=104 leaves current+1 uncovered → dropped, book unchanged
        assert!(
            !registry
                .apply_diff("btcusdt", &diff(103, 104, vec![raw("49000", "9")], vec![]))
                .await
        );
        assert_eq!(registry.last_update_id("btcusdt").await, Some(105));
        let snap = registry.get_snapshot("btcusdt", None).await.unwrap();
        assert!(snap.bids.iter().all(|l| l.price != Decimal::from_str("49000").unwrap()));

        let stats = registry.stats().await;
        assert_eq!(stats.diffs_applied, 2);
        assert_eq!(stats.diffs_dropped, 1);
    }

    #[tokio::test]
    async fn test_duplicate_diff_rejected() {
        let registry = BookRegistry::new();
        let d = diff(101, 105, vec![raw("50000", "1")], vec![]);
        registry.apply_diff("btcusdt", &d).await;
        assert!(!registry.apply_diff("btcusdt", &d).await);
        assert_eq!(registry.last_update_id("btcusdt").await, Some(105));
    }

    #[tokio::test]
    async fn test_large_gap_resync() {
        let registry = BookRegistry::new();
        registry
            .apply_diff("btcusdt", &diff(100, 100, vec![raw("50000", "1")], vec![]))
            .await;

        let accepted = registry
            .apply_diff("btcusdt", &diff(5000, 5010, vec![raw("51000", "2")], vec![]))
            .await;

        assert!(accepted);
        assert_eq!(registry.last_update_id("btcusdt").await, Some(5010));
        assert_eq!(registry.stats().await.resyncs, 1);
    }

    #[tokio::test]
    async fn test_last_update_id_monotone_over_accepted_diffs() {
        let registry = BookRegistry::new();
        let mut previous = 0;
        let steps = [(10, 20), (21, 30), (25, 35), (36, 36)];
        for (first, last) in steps {
            if registry
                .apply_diff("btcusdt", &diff(first, last, vec![raw("50000", "1")], vec![]))
                .await
            {
                let current = registry.last_update_id("btcusdt").await.unwrap();
                assert!(current > previous);
                previous = current;
            }
        }
    }

    #[tokio::test]
    async fn test_snapshot_roundtrip() {
        let registry = BookRegistry::new();
        let snap = DepthSnapshot {
            last_update_id: 160,
            bids: vec![raw("50000", "1.5"), raw("49999", "2")],
            asks: vec![raw("50001", "3")],
        };

        assert!(registry.apply_snapshot("btcusdt", &snap).await);

        let book = registry.get_snapshot("btcusdt", None).await.unwrap();
        assert_eq!(book.last_update_id, 160);
        let bid_prices: Vec<String> = book.bids.iter().map(|l| l.price.to_string()).collect();
        assert_eq!(bid_prices, vec!["50000", "49999"]);
        assert_eq!(book.asks[0].quantity, Decimal::from_str("3").unwrap());
    }

    #[tokio::test]
    async fn test_snapshot_replaces_previous_state() {
        let registry = BookRegistry::new();
        registry
            .apply_diff("btcusdt", &diff(1, 5, vec![raw("40000", "1")], vec![]))
            .await;

        let snap = DepthSnapshot {
            last_update_id: 200,
            bids: vec![raw("50000", "1")],
            asks: vec![],
        };
        registry.apply_snapshot("btcusdt", &snap).await;

        let book = registry.get_snapshot("btcusdt", None).await.unwrap();
        assert_eq!(book.bids.len(), 1);
        assert_eq!(book.bids[0].price, Decimal::from_str("50000").unwrap());
        assert_eq!(book.last_update_id, 200);
    }

    #[tokio::test]
    async fn test_invalid_snapshot_rejected() {
        let registry = BookRegistry::new();
        let snap = DepthSnapshot {
            last_update_id: 0,
            bids: vec![],
            asks: vec![],
        };
        assert!(!registry.apply_snapshot("btcusdt", &snap).await);
    }

    #[tokio::test]
    async fn test_invalid_levels_skipped_silently() {
        let registry = BookRegistry::new();
        let accepted = registry
            .apply_diff(
                "btcusdt",
                &diff(1, 5, vec![raw("50000", "1"), raw("bad", "1")], vec![]),
            )
            .await;

        assert!(accepted);
        let snap = registry.get_snapshot("btcusdt", None).await.unwrap();
        assert_eq!(snap.bids.len(), 1);
        assert_eq!(registry.stats().await.invalid_levels, 1);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_subscriber() {
        let registry = BookRegistry::new();
        let (_id, mut rx) = registry.subscribe().await;

        registry
            .apply_diff("btcusdt", &diff(1, 5, vec![raw("50000", "1")], vec![]))
            .await;

        let update = rx.recv().await.unwrap();
        assert_eq!(update.symbol, "btcusdt");
        assert_eq!(update.snapshot.last_update_id, 5);
    }

    #[tokio::test]
    async fn test_closed_subscriber_removed_on_broadcast() {
        let registry = BookRegistry::new();
        let (_id, rx) = registry.subscribe().await;
        assert_eq!(registry.subscriber_count().await, 1);
        drop(rx);

        registry
            .apply_diff("btcusdt", &diff(1, 5, vec![raw("50000", "1")], vec![]))
            .await;

        assert_eq!(registry.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_removes_handle() {
        let registry = BookRegistry::new();
        let (id, _rx) = registry.subscribe().await;
        registry.unsubscribe(id).await;
        assert_eq!(registry.subscriber_count().await, 0);
    }
}
