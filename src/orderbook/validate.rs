//! Feed validation predicates
//!
//! Pure checks applied to inbound venue messages before they touch a book.
//! All functions are side-effect free; the registry and venue feed decide
//! what to do with a failing message.

use rust_decimal::Decimal;
use std::str::FromStr;

use crate::binance::types::{DepthSnapshot, DepthUpdateEvent, RawLevel};

/// A level is valid when both entries parse as decimals, the price is
/// strictly positive and the quantity is non-negative
pub fn is_valid_price_level(level: &RawLevel) -> bool {
    sanitize_price_level(level).is_some()
}

/// Parse a raw `[price, quantity]` pair, returning None when it fails the
/// validity predicate
pub fn sanitize_price_level(level: &RawLevel) -> Option<(Decimal, Decimal)> {
    let price = Decimal::from_str(&level[0]).ok()?;
    let quantity = Decimal::from_str(&level[1]).ok()?;
    (price > Decimal::ZERO && quantity >= Decimal::ZERO).then_some((price, quantity))
}

/// A diff is well-formed when it carries the depthUpdate event kind, a
/// non-empty symbol, and only valid price levels
pub fn is_valid_diff_update(msg: &DepthUpdateEvent) -> bool {
    msg.event_type == "depthUpdate"
        && !msg.symbol.is_empty()
        && msg.bids.iter().all(is_valid_price_level)
        && msg.asks.iter().all(is_valid_price_level)
}

/// A snapshot is well-formed when its update id is positive and both ladders
/// carry only valid price levels
pub fn is_valid_snapshot(msg: &DepthSnapshot) -> bool {
    msg.last_update_id > 0
        && msg.bids.iter().all(is_valid_price_level)
        && msg.asks.iter().all(is_valid_price_level)
}

/// Diff-continuity rule: the diff must cover the expected next update id,
/// i.e. `U ≤ current + 1` and `u ≥ current + 1`
pub fn sequence_ok(current: i64, first_update_id: i64, final_update_id: i64) -> bool {
    first_update_id <= current + 1 && final_update_id >= current + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(price: &str, qty: &str) -> RawLevel {
        [price.to_string(), qty.to_string()]
    }

    fn diff(first: i64, last: i64) -> DepthUpdateEvent {
        DepthUpdateEvent {
            event_type: "depthUpdate".to_string(),
            event_time: 0,
            symbol: "BTCUSDT".to_string(),
            first_update_id: first,
            final_update_id: last,
            bids: vec![raw("50000.00", "1.5")],
            asks: vec![raw("50001.00", "0")],
        }
    }

    #[test]
    fn test_price_level_validity() {
        assert!(is_valid_price_level(&raw("50000.00", "1.5")));
        assert!(is_valid_price_level(&raw("50000.00", "0")));
        assert!(!is_valid_price_level(&raw("0", "1.5")));
        assert!(!is_valid_price_level(&raw("-1", "1.5")));
        assert!(!is_valid_price_level(&raw("50000.00", "-0.1")));
        assert!(!is_valid_price_level(&raw("abc", "1.5")));
        assert!(!is_valid_price_level(&raw("50000.00", "NaN")));
    }

    #[test]
    fn test_sanitize_parses_values() {
        let (price, qty) = sanitize_price_level(&raw("50000.50", "1.25")).unwrap();
        assert_eq!(price, Decimal::from_str("50000.50").unwrap());
        assert_eq!(qty, Decimal::from_str("1.25").unwrap());
        assert!(sanitize_price_level(&raw("", "1")).is_none());
    }

    #[test]
    fn test_diff_update_validity() {
        assert!(is_valid_diff_update(&diff(100, 105)));

        let mut wrong_kind = diff(100, 105);
        wrong_kind.event_type = "aggTrade".to_string();
        assert!(!is_valid_diff_update(&wrong_kind));

        let mut empty_symbol = diff(100, 105);
        empty_symbol.symbol.clear();
        assert!(!is_valid_diff_update(&empty_symbol));

        let mut bad_level = diff(100, 105);
        bad_level.bids.push(raw("not-a-price", "1"));
        assert!(!is_valid_diff_update(&bad_level));
    }

    #[test]
    fn test_snapshot_validity() {
        let snap = DepthSnapshot {
            last_update_id: 160,
            bids: vec![raw("50000.00", "1.5")],
            asks: vec![raw("50001.00", "2.0")],
        };
        assert!(is_valid_snapshot(&snap));

        let zero_id = DepthSnapshot {
            last_update_id: 0,
            ..snap.clone()
        };
        assert!(!is_valid_snapshot(&zero_id));

        let mut bad_level = snap;
        bad_level.asks.push(raw("x", "y"));
        assert!(!is_valid_snapshot(&bad_level));
    }

    #[test]
    fn test_sequence_continuity() {
        // Diff covering exactly the next id
        assert!(sequence_ok(100, 101, 105));
        // Overlapping diff that still covers current + 1
        assert!(sequence_ok(100, 95, 101));
        // Gap ahead of the expected id
        assert!(!sequence_ok(100, 103, 104));
        // Entirely stale diff
        assert!(!sequence_ok(100, 95, 100));
    }
}
