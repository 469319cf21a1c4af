//! Per-symbol L2 order book.
//!
//! Fed by exactly one WebSocket shard; snapshots replace both sides,
//! deltas upsert or remove single levels (qty == 0 removes).
//! Readers never walk the maps directly: they take a sorted copy via
//! `snapshot()` so a concurrent delta cannot produce a torn view.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use tracing::warn;

/// Age reported for a book that has never been updated.
pub const NEVER_UPDATED_AGE_MS: i64 = 10_000_000;

/// Price level rows as they arrive on the wire: `[priceStr, qtyStr, ...]`.
pub type RawLevels = Vec<Vec<String>>;

#[derive(Debug, Clone, Default)]
pub struct OrderBook {
    pub symbol: String,
    /// price -> qty, ascending by key. Best bid is the last key.
    pub bids: BTreeMap<Decimal, Decimal>,
    /// price -> qty, ascending by key. Best ask is the first key.
    pub asks: BTreeMap<Decimal, Decimal>,
    pub last_update_ms: i64,
    pub last_cts_ms: i64,
    pub last_snapshot_ms: i64,
}

fn parse_row(symbol: &str, side: &str, row: &[String]) -> Option<(Decimal, Decimal)> {
    if row.len() < 2 {
        warn!(symbol, side, ?row, "skip malformed book row (len<2)");
        return None;
    }
    let price: Option<Decimal> = row[0].parse().ok();
    let qty: Option<Decimal> = row[1].parse().ok();
    match (price, qty) {
        (Some(p), Some(q)) => Some((p, q)),
        _ => {
            warn!(symbol, side, p = %row[0], q = %row[1], "skip malformed book row");
            None
        }
    }
}

impl OrderBook {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            ..Default::default()
        }
    }

    /// Replace both sides. Levels with qty <= 0 are omitted.
    pub fn apply_snapshot(&mut self, bids: &RawLevels, asks: &RawLevels, ts_ms: i64, cts_ms: i64) {
        self.bids = self.parse_side("bid", bids);
        self.asks = self.parse_side("ask", asks);
        self.last_update_ms = ts_ms;
        self.last_cts_ms = cts_ms;
        self.last_snapshot_ms = if cts_ms > 0 { cts_ms } else { ts_ms };
    }

    /// Upsert levels; qty == 0 removes. Removing an absent level is a no-op.
    pub fn apply_delta(&mut self, bids: &RawLevels, asks: &RawLevels, ts_ms: i64, cts_ms: i64) {
        for row in bids {
            if let Some((price, qty)) = parse_row(&self.symbol, "bid", row) {
                if qty.is_zero() {
                    self.bids.remove(&price);
                } else {
                    self.bids.insert(price, qty);
                }
            }
        }
        for row in asks {
            if let Some((price, qty)) = parse_row(&self.symbol, "ask", row) {
                if qty.is_zero() {
                    self.asks.remove(&price);
                } else {
                    self.asks.insert(price, qty);
                }
            }
        }
        self.last_update_ms = ts_ms;
        self.last_cts_ms = cts_ms;
    }

    fn parse_side(&self, side: &str, rows: &RawLevels) -> BTreeMap<Decimal, Decimal> {
        let mut out = BTreeMap::new();
        for row in rows {
            if let Some((price, qty)) = parse_row(&self.symbol, side, row) {
                if qty > Decimal::ZERO {
                    out.insert(price, qty);
                }
            }
        }
        out
    }

    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.keys().next_back().copied()
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.keys().next().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() || self.asks.is_empty()
    }

    /// Milliseconds since the most recent server/update timestamp.
    pub fn age_ms(&self) -> i64 {
        let last = self.last_cts_ms.max(self.last_update_ms);
        if last <= 0 {
            return NEVER_UPDATED_AGE_MS;
        }
        (now_ms() - last).max(0)
    }

    /// Sorted copies for this tick: bids best-first (descending),
    /// asks best-first (ascending).
    pub fn snapshot(&self) -> (Vec<(Decimal, Decimal)>, Vec<(Decimal, Decimal)>) {
        let bids: Vec<_> = self.bids.iter().rev().map(|(p, q)| (*p, *q)).collect();
        let asks: Vec<_> = self.asks.iter().map(|(p, q)| (*p, *q)).collect();
        (bids, asks)
    }
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn rows(levels: &[(&str, &str)]) -> RawLevels {
        levels
            .iter()
            .map(|(p, q)| vec![p.to_string(), q.to_string()])
            .collect()
    }

    #[test]
    fn snapshot_replaces_both_sides_and_drops_zero_qty() {
        let mut ob = OrderBook::new("TKNUSDT");
        ob.apply_snapshot(
            &rows(&[("10.0", "1"), ("9.9", "0")]),
            &rows(&[("10.1", "2")]),
            1000,
            1000,
        );
        assert_eq!(ob.bids.len(), 1);
        assert_eq!(ob.best_bid(), Some(dec!(10.0)));
        assert_eq!(ob.best_ask(), Some(dec!(10.1)));

        ob.apply_snapshot(&rows(&[("11.0", "3")]), &rows(&[("11.2", "1")]), 2000, 2000);
        assert_eq!(ob.bids.len(), 1);
        assert_eq!(ob.best_bid(), Some(dec!(11.0)));
    }

    #[test]
    fn delta_upserts_and_removes() {
        let mut ob = OrderBook::new("TKNUSDT");
        ob.apply_snapshot(&rows(&[("10.0", "1")]), &rows(&[("10.1", "2")]), 1, 1);

        ob.apply_delta(&rows(&[("10.0", "5"), ("9.5", "7")]), &rows(&[("10.1", "0")]), 2, 2);
        assert_eq!(ob.bids.get(&dec!(10.0)), Some(&dec!(5)));
        assert_eq!(ob.bids.get(&dec!(9.5)), Some(&dec!(7)));
        assert!(ob.asks.is_empty());

        // removing an absent level is a no-op
        ob.apply_delta(&rows(&[("8.8", "0")]), &rows(&[]), 3, 3);
        assert_eq!(ob.bids.len(), 2);
    }

    #[test]
    fn malformed_rows_are_dropped() {
        let mut ob = OrderBook::new("TKNUSDT");
        let mut bids = rows(&[("10.0", "1")]);
        bids.push(vec!["just-one".to_string()]);
        bids.push(vec!["abc".to_string(), "1".to_string()]);
        ob.apply_snapshot(&bids, &rows(&[]), 1, 1);
        assert_eq!(ob.bids.len(), 1);
    }

    #[test]
    fn every_stored_level_is_positive_after_any_sequence() {
        let mut ob = OrderBook::new("TKNUSDT");
        ob.apply_snapshot(&rows(&[("10", "1"), ("9", "2")]), &rows(&[("11", "1")]), 1, 1);
        ob.apply_delta(&rows(&[("9", "0"), ("8", "4")]), &rows(&[("11", "3"), ("12", "0")]), 2, 2);
        for qty in ob.bids.values().chain(ob.asks.values()) {
            assert!(*qty > Decimal::ZERO);
        }
    }

    #[test]
    fn age_is_sentinel_until_first_update() {
        let ob = OrderBook::new("TKNUSDT");
        assert_eq!(ob.age_ms(), NEVER_UPDATED_AGE_MS);

        let mut ob = OrderBook::new("TKNUSDT");
        ob.apply_snapshot(&rows(&[("1", "1")]), &rows(&[("2", "1")]), now_ms(), now_ms());
        assert!(ob.age_ms() < 5_000);
    }

    #[test]
    fn snapshot_orders_bids_descending_asks_ascending() {
        let mut ob = OrderBook::new("TKNUSDT");
        ob.apply_snapshot(
            &rows(&[("9", "1"), ("10", "1"), ("8", "1")]),
            &rows(&[("12", "1"), ("11", "1")]),
            1,
            1,
        );
        let (bids, asks) = ob.snapshot();
        assert_eq!(bids[0].0, dec!(10));
        assert_eq!(bids[2].0, dec!(8));
        assert_eq!(asks[0].0, dec!(11));
    }
}
