//! Per-symbol aggregated order book
//!
//! Maintains sorted bid/ask ladders using BTreeMap keyed by price, plus the
//! derived analytics served by the query surface: top-of-book, accumulated
//! quantity to a target price, market-impact simulation, and the layered
//! liquidity profile.
//!
//! Mutation happens only through the registry (diff apply / snapshot apply);
//! everything else here is a read-only projection.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::orderbook::level::PriceLevel;

/// Which side(s) an accumulation query walks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccumulationSide {
    Bids,
    Asks,
    Both,
}

impl std::str::FromStr for AccumulationSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bids" => Ok(AccumulationSide::Bids),
            "asks" => Ok(AccumulationSide::Asks),
            "both" => Ok(AccumulationSide::Both),
            other => Err(format!("invalid side: {} (expected bids, asks or both)", other)),
        }
    }
}

/// Taker direction for market-impact simulation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    /// Consumes asks, lowest price first
    Buy,
    /// Consumes bids, highest price first
    Sell,
}

impl std::str::FromStr for TradeSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "buy" => Ok(TradeSide::Buy),
            "sell" => Ok(TradeSide::Sell),
            other => Err(format!("invalid side: {} (expected buy or sell)", other)),
        }
    }
}

/// Point-in-time projection of one book
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub symbol: String,
    pub last_update_id: i64,
    pub last_update_time: i64,

    /// Top levels, best bid first (descending price)
    pub bids: Vec<PriceLevel>,

    /// Top levels, best ask first (ascending price)
    pub asks: Vec<PriceLevel>,

    /// best_ask - best_bid; absent when either side is empty, negative under
    /// transient venue crossing
    pub spread: Option<Decimal>,

    /// (best_bid + best_ask) / 2; absent when either side is empty
    pub mid_price: Option<Decimal>,

    /// Total level counts for the full ladder, regardless of truncation
    pub total_bids: usize,
    pub total_asks: usize,
}

/// Per-side totals for an accumulation query
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SideTotals {
    pub quantity: Decimal,

    /// Σ (price × quantity) over the accumulated levels
    pub cost: Decimal,

    /// cost / quantity, or 0 when nothing accumulated
    pub average_price: Decimal,
}

/// Result of `accumulated_to_price`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccumulatedToPrice {
    pub symbol: String,
    pub target_price: Decimal,
    pub side: AccumulationSide,

    /// Present when the query covered bids
    pub bids: Option<SideTotals>,

    /// Present when the query covered asks
    pub asks: Option<SideTotals>,

    /// Combined totals across the covered sides
    pub total: SideTotals,

    pub timestamp: i64,
}

/// One ladder rung consumed by a simulated taker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumedLevel {
    pub price: Decimal,
    pub quantity: Decimal,
    pub cost: Decimal,
}

/// Result of `market_impact`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketImpact {
    pub symbol: String,
    pub order_size: Decimal,
    pub side: TradeSide,
    pub total_cost: Decimal,

    /// Volume-weighted fill price; 0 when nothing was consumed (kept finite
    /// so the result stays JSON-serializable)
    pub average_price: Decimal,

    /// Price of the last touched level, 0 when nothing was consumed
    pub final_price: Decimal,

    pub remaining_size: Decimal,
    pub filled_size: Decimal,
    pub levels_consumed: Vec<ConsumedLevel>,

    /// Percent distance between the average fill and the pre-trade touch on
    /// the consumed side; 0 when nothing was consumed
    pub slippage: f64,

    pub can_fill: bool,
    pub timestamp: i64,
}

/// One rung of the liquidity profile with running totals
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileLevel {
    pub price: Decimal,
    pub quantity: Decimal,
    pub accumulated_quantity: Decimal,
    pub accumulated_cost: Decimal,

    /// Running VWAP down to this rung
    pub average_price: Decimal,
}

/// Result of `liquidity_profile`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidityProfile {
    pub symbol: String,
    pub depth_levels: usize,
    pub bids: Vec<ProfileLevel>,
    pub asks: Vec<ProfileLevel>,
    pub timestamp: i64,
}

/// Aggregated order book for a single trading symbol
///
/// Bid and ask ladders are BTreeMaps keyed by price, so iteration order is
/// always ascending; bid reads reverse the iterator for best-first order.
#[derive(Debug, Clone)]
pub struct OrderBook {
    /// Trading pair symbol (lowercase, e.g. "btcusdt")
    pub symbol: String,

    /// Bid ladder: price → level
    bids: BTreeMap<Decimal, PriceLevel>,

    /// Ask ladder: price → level
    asks: BTreeMap<Decimal, PriceLevel>,

    /// Final update id of the last applied diff or snapshot (0 = uninitialized)
    pub last_update_id: i64,

    /// Timestamp of the last mutation (milliseconds since Unix epoch)
    pub last_update_time: i64,
}

impl OrderBook {
    /// Create a new empty order book for the given symbol
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            last_update_id: 0,
            last_update_time: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Write or replace a bid level; quantity 0 deletes (idempotent when the
    /// price is absent)
    pub fn add_bid(&mut self, price: Decimal, quantity: Decimal, count: u32) {
        Self::write_level(&mut self.bids, price, quantity, count);
        self.last_update_time = chrono::Utc::now().timestamp_millis();
    }

    /// Write or replace an ask level; quantity 0 deletes
    pub fn add_ask(&mut self, price: Decimal, quantity: Decimal, count: u32) {
        Self::write_level(&mut self.asks, price, quantity, count);
        self.last_update_time = chrono::Utc::now().timestamp_millis();
    }

    /// Same effect as `add_bid`, but a no-op when the price is not present.
    /// The venue diff semantics treat add and update identically; this exists
    /// for callers that must not create levels.
    pub fn update_bid(&mut self, price: Decimal, quantity: Decimal, count: u32) {
        if self.bids.contains_key(&price) {
            self.add_bid(price, quantity, count);
        }
    }

    /// Same effect as `add_ask`, but a no-op when the price is not present
    pub fn update_ask(&mut self, price: Decimal, quantity: Decimal, count: u32) {
        if self.asks.contains_key(&price) {
            self.add_ask(price, quantity, count);
        }
    }

    fn write_level(
        side: &mut BTreeMap<Decimal, PriceLevel>,
        price: Decimal,
        quantity: Decimal,
        count: u32,
    ) {
        if quantity.is_zero() {
            side.remove(&price);
        } else {
            side.entry(price)
                .and_modify(|level| level.update(quantity, count))
                .or_insert_with(|| PriceLevel::new(price, quantity, count));
        }
    }

    /// Top-N bid levels, best (highest price) first; the full side without a limit
    pub fn bids(&self, limit: Option<usize>) -> Vec<PriceLevel> {
        let iter = self.bids.values().rev().cloned();
        match limit {
            Some(n) => iter.take(n).collect(),
            None => iter.collect(),
        }
    }

    /// Top-N ask levels, best (lowest price) first; the full side without a limit
    pub fn asks(&self, limit: Option<usize>) -> Vec<PriceLevel> {
        let iter = self.asks.values().cloned();
        match limit {
            Some(n) => iter.take(n).collect(),
            None => iter.collect(),
        }
    }

    /// Highest-priced bid level
    pub fn best_bid(&self) -> Option<&PriceLevel> {
        self.bids.values().next_back()
    }

    /// Lowest-priced ask level
    pub fn best_ask(&self) -> Option<&PriceLevel> {
        self.asks.values().next()
    }

    /// best_ask - best_bid; None when either side is empty. May be negative
    /// under transient venue crossing.
    pub fn spread(&self) -> Option<Decimal> {
        Some(self.best_ask()?.price - self.best_bid()?.price)
    }

    /// (best_bid + best_ask) / 2; None when either side is empty
    pub fn mid_price(&self) -> Option<Decimal> {
        let best_bid = self.best_bid()?.price;
        let best_ask = self.best_ask()?.price;
        Some((best_bid + best_ask) / Decimal::TWO)
    }

    pub fn total_bids(&self) -> usize {
        self.bids.len()
    }

    pub fn total_asks(&self) -> usize {
        self.asks.len()
    }

    /// Composite projection with optionally truncated ladders
    pub fn snapshot(&self, limit: Option<usize>) -> BookSnapshot {
        BookSnapshot {
            symbol: self.symbol.clone(),
            last_update_id: self.last_update_id,
            last_update_time: self.last_update_time,
            bids: self.bids(limit),
            asks: self.asks(limit),
            spread: self.spread(),
            mid_price: self.mid_price(),
            total_bids: self.total_bids(),
            total_asks: self.total_asks(),
        }
    }

    /// Accumulate quantity and cost from the touch out to `target_price`
    ///
    /// Bids accumulate every level with price ≥ target; asks every level with
    /// price ≤ target. The walk stops at the first level failing the
    /// predicate, since the sides are sorted.
    pub fn accumulated_to_price(
        &self,
        target_price: Decimal,
        side: AccumulationSide,
    ) -> AccumulatedToPrice {
        let bids = matches!(side, AccumulationSide::Bids | AccumulationSide::Both).then(|| {
            Self::accumulate_while(
                self.bids.values().rev(),
                |level| level.price >= target_price,
            )
        });
        let asks = matches!(side, AccumulationSide::Asks | AccumulationSide::Both).then(|| {
            Self::accumulate_while(self.asks.values(), |level| level.price <= target_price)
        });

        let mut total = SideTotals::default();
        for totals in [&bids, &asks].into_iter().flatten() {
            total.quantity += totals.quantity;
            total.cost += totals.cost;
        }
        total.average_price = if total.quantity.is_zero() {
            Decimal::ZERO
        } else {
            total.cost / total.quantity
        };

        AccumulatedToPrice {
            symbol: self.symbol.clone(),
            target_price,
            side,
            bids,
            asks,
            total,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    fn accumulate_while<'a>(
        levels: impl Iterator<Item = &'a PriceLevel>,
        qualifies: impl Fn(&PriceLevel) -> bool,
    ) -> SideTotals {
        let mut quantity = Decimal::ZERO;
        let mut cost = Decimal::ZERO;

        for level in levels {
            if !qualifies(level) {
                break;
            }
            quantity += level.quantity;
            cost += level.price * level.quantity;
        }

        let average_price = if quantity.is_zero() {
            Decimal::ZERO
        } else {
            cost / quantity
        };

        SideTotals {
            quantity,
            cost,
            average_price,
        }
    }

    /// Simulate a taker order of `order_size` consuming the opposite side
    ///
    /// Buys consume asks ascending, sells consume bids descending. Returns
    /// None for a non-positive order size.
    pub fn market_impact(&self, order_size: Decimal, side: TradeSide) -> Option<MarketImpact> {
        if order_size <= Decimal::ZERO {
            return None;
        }

        let levels: Vec<&PriceLevel> = match side {
            TradeSide::Buy => self.asks.values().collect(),
            TradeSide::Sell => self.bids.values().rev().collect(),
        };
        let best_price = levels.first().map(|level| level.price);

        let mut remaining = order_size;
        let mut total_cost = Decimal::ZERO;
        let mut final_price = Decimal::ZERO;
        let mut levels_consumed = Vec::new();

        for level in levels {
            if remaining.is_zero() {
                break;
            }
            let consumed = remaining.min(level.quantity);
            let cost = consumed * level.price;

            total_cost += cost;
            remaining -= consumed;
            final_price = level.price;
            levels_consumed.push(ConsumedLevel {
                price: level.price,
                quantity: consumed,
                cost,
            });
        }

        let filled_size = order_size - remaining;
        let average_price = if filled_size.is_zero() {
            Decimal::ZERO
        } else {
            total_cost / filled_size
        };

        let slippage = match (best_price, filled_size.is_zero()) {
            (Some(best), false) if !best.is_zero() => {
                let signed = match side {
                    TradeSide::Buy => (average_price - best) / best,
                    TradeSide::Sell => (best - average_price) / best,
                };
                (signed * Decimal::ONE_HUNDRED).to_f64().unwrap_or(0.0)
            }
            _ => 0.0,
        };

        Some(MarketImpact {
            symbol: self.symbol.clone(),
            order_size,
            side,
            total_cost,
            average_price,
            final_price,
            remaining_size: remaining,
            filled_size,
            levels_consumed,
            slippage,
            can_fill: remaining.is_zero(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        })
    }

    /// Top-`levels` of each side with running accumulated quantity, cost and VWAP
    pub fn liquidity_profile(&self, levels: usize) -> LiquidityProfile {
        LiquidityProfile {
            symbol: self.symbol.clone(),
            depth_levels: levels,
            bids: Self::profile_side(self.bids.values().rev().take(levels)),
            asks: Self::profile_side(self.asks.values().take(levels)),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    fn profile_side<'a>(levels: impl Iterator<Item = &'a PriceLevel>) -> Vec<ProfileLevel> {
        let mut accumulated_quantity = Decimal::ZERO;
        let mut accumulated_cost = Decimal::ZERO;

        levels
            .map(|level| {
                accumulated_quantity += level.quantity;
                accumulated_cost += level.price * level.quantity;
                let average_price = if accumulated_quantity.is_zero() {
                    Decimal::ZERO
                } else {
                    accumulated_cost / accumulated_quantity
                };
                ProfileLevel {
                    price: level.price,
                    quantity: level.quantity,
                    accumulated_quantity,
                    accumulated_cost,
                    average_price,
                }
            })
            .collect()
    }

    /// Registry bookkeeping: adopt the final update id of an applied diff
    pub fn update_last_update_id(&mut self, id: i64) {
        self.last_update_id = id;
        self.last_update_time = chrono::Utc::now().timestamp_millis();
    }

    /// Drop both sides and reset sequencing (snapshot apply only)
    pub fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
        self.last_update_id = 0;
        self.last_update_time = chrono::Utc::now().timestamp_millis();
    }
}
