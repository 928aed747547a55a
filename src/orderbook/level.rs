//! Price level record
//!
//! A single rung of the aggregated ladder. Levels are keyed by price in the
//! owning side, so a level carries no identity beyond its price.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Aggregated quantity resting at one price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    /// Level price (positive)
    pub price: Decimal,

    /// Aggregate quantity at this price (a level exists iff quantity > 0)
    pub quantity: Decimal,

    /// Number of orders aggregated into the level (venue diffs carry no
    /// per-order detail, so this stays 1 unless a snapshot source says more)
    pub count: u32,

    /// Last-touch time (milliseconds since Unix epoch)
    pub timestamp: i64,
}

impl PriceLevel {
    pub fn new(price: Decimal, quantity: Decimal, count: u32) -> Self {
        Self {
            price,
            quantity,
            count,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Replace quantity and count, advancing the last-touch timestamp
    pub fn update(&mut self, quantity: Decimal, count: u32) {
        self.quantity = quantity;
        self.count = count;
        self.timestamp = chrono::Utc::now().timestamp_millis();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_update_refreshes_fields() {
        let price = Decimal::from_str("50000.00").unwrap();
        let mut level = PriceLevel::new(price, Decimal::from_str("1.5").unwrap(), 1);
        let created_at = level.timestamp;

        level.update(Decimal::from_str("2.25").unwrap(), 3);

        assert_eq!(level.price, price);
        assert_eq!(level.quantity, Decimal::from_str("2.25").unwrap());
        assert_eq!(level.count, 3);
        assert!(level.timestamp >= created_at);
    }
}
