//! Shared market state: order books and per-token quote pairs.
//!
//! Both registries are sharded maps; entries are created lazily and live
//! for the whole run. A book is mutated by exactly one WS shard, so it
//! only needs a read/write lock for snapshotting. A quote pair has two
//! writers (poller and engine re-quote) plus the engine snapshot, so it
//! carries its own async mutex.

use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::jupiter::JupQuote;
use crate::market::orderbook::OrderBook;

pub use crate::market::orderbook::now_ms;

/// Quotes for one token, snapshotted atomically under the pair mutex.
#[derive(Debug, Default)]
pub struct QuotePair {
    pub buy_quote: Option<JupQuote>,
    pub buy_updated_ms: i64,

    pub sell_quote: Option<JupQuote>,
    pub sell_updated_ms: i64,
    /// Base amount (raw) the sell quote was requested for.
    pub sell_amount_raw: u128,
}

pub type SharedBook = Arc<RwLock<OrderBook>>;
pub type SharedQuotePair = Arc<Mutex<QuotePair>>;

#[derive(Default)]
pub struct MarketState {
    books: DashMap<String, SharedBook>,
    quotes: DashMap<String, SharedQuotePair>,
}

impl MarketState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_orderbook(&self, symbol: &str) -> SharedBook {
        self.books
            .entry(symbol.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(OrderBook::new(symbol))))
            .clone()
    }

    pub fn get_orderbook(&self, symbol: &str) -> Option<SharedBook> {
        self.books.get(symbol).map(|e| e.clone())
    }

    pub fn get_quote_pair(&self, token_key: &str) -> SharedQuotePair {
        self.quotes
            .entry(token_key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(QuotePair::default())))
            .clone()
    }

    pub fn book_count(&self) -> usize {
        self.books.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orderbook_is_created_once_and_shared() {
        let state = MarketState::new();
        let a = state.upsert_orderbook("TKNUSDT");
        let b = state.upsert_orderbook("TKNUSDT");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(state.get_orderbook("OTHERUSDT").is_none());
    }

    #[tokio::test]
    async fn quote_pair_is_lazily_created() {
        let state = MarketState::new();
        let qp = state.get_quote_pair("TKN");
        {
            let mut guard = qp.lock().await;
            guard.buy_updated_ms = 42;
        }
        let again = state.get_quote_pair("TKN");
        assert_eq!(again.lock().await.buy_updated_ms, 42);
    }
}
