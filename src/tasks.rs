//! Background loops and glue between the feed, the state and the
//! quarantine: book ingestion, status reporting, feed health.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::arbitrage::ArbEngine;
use crate::bybit::{BookKind, BookMessage, BookSink};
use crate::market::state::now_ms;
use crate::market::MarketState;
use crate::quarantine::{QuarantineManager, REASON_WS_STALE};

const FRESH_MS: i64 = 2000;
const WS_STALE_QUARANTINE_TTL_SEC: u64 = 6 * 3600;
const WS_STALE_MAX_ADDS_PER_PASS: usize = 50;

/// Applies WS book messages to the shared state. Messages for
/// quarantined symbols are dropped at the door so a lagging unsubscribe
/// cannot resurrect a disabled book.
pub struct MarketBookSink {
    state: Arc<MarketState>,
    quarantine: Arc<QuarantineManager>,
}

impl MarketBookSink {
    pub fn new(state: Arc<MarketState>, quarantine: Arc<QuarantineManager>) -> Arc<Self> {
        Arc::new(Self { state, quarantine })
    }
}

#[async_trait]
impl BookSink for MarketBookSink {
    async fn on_book_message(&self, msg: BookMessage) {
        if self.quarantine.contains(&msg.symbol) {
            return;
        }
        let book = self.state.upsert_orderbook(&msg.symbol);
        let mut ob = book.write().unwrap_or_else(|e| e.into_inner());
        match msg.kind {
            BookKind::Snapshot => ob.apply_snapshot(&msg.bids, &msg.asks, msg.ts_ms, msg.cts_ms),
            BookKind::Delta => ob.apply_delta(&msg.bids, &msg.asks, msg.ts_ms, msg.cts_ms),
        }
    }
}

/// Periodic operational summary: active/quarantined counts, sampled book
/// freshness and the drained skip counters.
pub async fn status_loop(
    state: Arc<MarketState>,
    quarantine: Arc<QuarantineManager>,
    engine: Arc<ArbEngine>,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = stop.changed() => {}
        }
        if *stop.borrow() {
            return;
        }

        let symbols = quarantine.active().symbols.clone();
        let total = symbols.len();
        // Sample large watchlists instead of touching every book.
        let step = if total > 100 {
            (total / 50).clamp(1, 10)
        } else {
            1
        };

        let mut sampled = 0usize;
        let mut non_empty = 0usize;
        let mut fresh = 0usize;
        for symbol in symbols.iter().step_by(step) {
            sampled += 1;
            let Some(book) = state.get_orderbook(symbol) else {
                continue;
            };
            let ob = book.read().unwrap_or_else(|e| e.into_inner());
            if !ob.is_empty() {
                non_empty += 1;
                if ob.age_ms() <= FRESH_MS {
                    fresh += 1;
                }
            }
        }
        if sampled > 0 && step > 1 {
            let scale = total as f64 / sampled as f64;
            non_empty = ((non_empty as f64 * scale) as usize).min(total);
            fresh = ((fresh as f64 * scale) as usize).min(total);
        }

        let mut sample_parts: Vec<String> = Vec::new();
        for symbol in symbols.iter().take(5) {
            match state.get_orderbook(symbol) {
                None => sample_parts.push(format!("{symbol} OB empty")),
                Some(book) => {
                    let ob = book.read().unwrap_or_else(|e| e.into_inner());
                    match (ob.best_bid(), ob.best_ask()) {
                        (Some(bid), Some(ask)) => sample_parts.push(format!(
                            "{symbol} bid={bid} ask={ask} age={}ms",
                            ob.age_ms()
                        )),
                        _ => sample_parts.push(format!("{symbol} OB empty")),
                    }
                }
            }
        }

        let skip_text = match engine.drain_debug_stats() {
            None => "n/a".to_string(),
            Some(stats) if stats.is_empty() => "none".to_string(),
            Some(stats) => {
                let mut entries: Vec<_> = stats.into_iter().collect();
                entries.sort_by(|a, b| b.1.cmp(&a.1));
                entries
                    .iter()
                    .take(5)
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect::<Vec<_>>()
                    .join(", ")
            }
        };

        info!(
            "[STATUS] active={} | quarantined={} | OB non-empty {}/{} | OB fresh {}/{} (<={}ms) | skips(30s): {} | sample: {}",
            total,
            quarantine.quarantined_count(),
            non_empty,
            total,
            fresh,
            total,
            FRESH_MS,
            skip_text,
            sample_parts.join(" | "),
        );
    }
}

/// Quarantines symbols whose book stopped updating. Reconnects alone do
/// not clear the quarantine; the entry expires via TTL.
pub async fn ws_health_loop(
    state: Arc<MarketState>,
    quarantine: Arc<QuarantineManager>,
    timeout: Duration,
    mut stop: watch::Receiver<bool>,
) {
    if timeout.is_zero() {
        return;
    }
    let started = Instant::now();
    let interval = timeout.div_f64(2.0).max(Duration::from_secs(5));

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = stop.changed() => {}
        }
        if *stop.borrow() {
            return;
        }
        // Grace period after startup: books need time to arrive at all.
        if started.elapsed() < timeout {
            continue;
        }

        let now = now_ms();
        let timeout_ms = timeout.as_millis() as i64;
        let symbols = quarantine.active().symbols.clone();
        let mut stale: Vec<String> = Vec::new();
        for symbol in &symbols {
            let last_ms = state
                .get_orderbook(symbol)
                .map(|book| {
                    let ob = book.read().unwrap_or_else(|e| e.into_inner());
                    ob.last_cts_ms.max(ob.last_update_ms).max(ob.last_snapshot_ms)
                })
                .unwrap_or(0);
            if last_ms <= 0 || now - last_ms > timeout_ms {
                stale.push(symbol.clone());
            }
        }

        if !stale.is_empty() {
            for symbol in stale.iter().take(WS_STALE_MAX_ADDS_PER_PASS) {
                quarantine
                    .add(symbol, REASON_WS_STALE, WS_STALE_QUARANTINE_TTL_SEC)
                    .await;
            }
            warn!(
                stale = stale.len(),
                total = symbols.len(),
                timeout_sec = timeout.as_secs(),
                sample = %stale.iter().take(5).cloned().collect::<Vec<_>>().join(", "),
                "[HEALTH] stale book feeds quarantined"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quarantine::Watchlist;
    use crate::types::TokenConfig;
    use std::collections::BTreeMap;

    fn quarantine_with(symbol: &str) -> (Arc<QuarantineManager>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = tokio::sync::mpsc::channel(1);
        let mut tokens = BTreeMap::new();
        tokens.insert(
            symbol.to_string(),
            TokenConfig {
                bybit_symbol: format!("{symbol}USDT"),
                mint: "Mint".to_string(),
                decimals: 6,
            },
        );
        let manager = QuarantineManager::new(
            dir.path().join("quarantine.json"),
            Watchlist {
                symbols: vec![format!("{symbol}USDT")],
                tokens,
                denylist_symbols: vec![],
                denylist_regex: vec![],
            },
            tx,
        );
        manager.load_initial();
        (manager, dir)
    }

    fn delta(symbol: &str) -> BookMessage {
        BookMessage {
            symbol: symbol.to_string(),
            kind: BookKind::Snapshot,
            bids: vec![vec!["10.0".to_string(), "1".to_string()]],
            asks: vec![vec!["10.1".to_string(), "1".to_string()]],
            ts_ms: now_ms(),
            cts_ms: now_ms(),
        }
    }

    #[tokio::test]
    async fn book_sink_applies_messages() {
        let state = Arc::new(MarketState::new());
        let (quarantine, _dir) = quarantine_with("WIF");
        let sink = MarketBookSink::new(state.clone(), quarantine);

        sink.on_book_message(delta("WIFUSDT")).await;
        let book = state.get_orderbook("WIFUSDT").unwrap();
        assert!(!book.read().unwrap().is_empty());
    }

    #[tokio::test]
    async fn book_sink_drops_quarantined_symbols() {
        let state = Arc::new(MarketState::new());
        let (quarantine, _dir) = quarantine_with("WIF");
        quarantine.add("WIFUSDT", REASON_WS_STALE, 3600).await;
        let sink = MarketBookSink::new(state.clone(), quarantine);

        sink.on_book_message(delta("WIFUSDT")).await;
        assert!(state.get_orderbook("WIFUSDT").is_none());
    }
}
