//! Order book engine
//!
//! The per-symbol aggregated ladder, its analytic queries, the feed
//! validation predicates, and the registry that applies venue diffs and fans
//! out post-apply snapshots to streaming subscribers.

pub mod book;
pub mod level;
pub mod registry;
pub mod validate;

pub use book::{
    AccumulatedToPrice, AccumulationSide, BookSnapshot, LiquidityProfile, MarketImpact,
    OrderBook, TradeSide,
};
pub use level::PriceLevel;
pub use registry::{BookRegistry, BookSummary, BookUpdate, RegistryStats};
