//! Bridges quote-skip events to quarantine adds.
//!
//! Debounces per-mint: hits are counted inside a rolling window and a
//! symbol is only quarantined once its class threshold is reached.
//! A global adds-per-minute cap keeps a full DEX outage from pushing the
//! entire watchlist into quarantine at once.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tracing::debug;

use super::manager::QuarantineManager;
use super::store::{REASON_NOT_TRADABLE, REASON_NO_ROUTE};
use crate::jupiter::{SkipEvent, ERR_NO_ROUTE, ERR_TOKEN_NOT_TRADABLE};

const HIT_WINDOW: Duration = Duration::from_secs(20 * 60);
const NOT_TRADABLE_HITS: u32 = 1;
const NO_ROUTE_HITS: u32 = 30;
const MAX_QUARANTINES_PER_MIN: u32 = 10;

#[derive(Debug, Clone)]
pub struct SanitizerConfig {
    pub stable_mint: String,
    /// mint -> bybit symbol for the full watchlist.
    pub mint_to_symbol: HashMap<String, String>,
    pub ttl_not_tradable_sec: u64,
    pub ttl_no_route_sec: u64,
}

pub struct Sanitizer {
    cfg: SanitizerConfig,
    hits: HashMap<String, (u32, Instant)>,
    rate_window_start: Instant,
    rate_count: u32,
}

/// Decision produced for one skip event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuarantineAction {
    pub symbol: String,
    pub reason: &'static str,
    pub ttl_sec: u64,
}

impl Sanitizer {
    pub fn new(cfg: SanitizerConfig) -> Self {
        Self {
            cfg,
            hits: HashMap::new(),
            rate_window_start: Instant::now(),
            rate_count: 0,
        }
    }

    pub fn handle(&mut self, event: &SkipEvent) -> Option<QuarantineAction> {
        let mint = self.resolve_mint(event)?;
        let symbol = self.cfg.mint_to_symbol.get(&mint)?.clone();

        let now = Instant::now();
        let entry = self.hits.entry(mint).or_insert((0, now));
        if now.duration_since(entry.1) > HIT_WINDOW {
            entry.0 = 0;
        }
        entry.1 = now;
        entry.0 += 1;
        let count = entry.0;

        let (threshold, reason, ttl) = match event.code.as_str() {
            ERR_TOKEN_NOT_TRADABLE => (
                NOT_TRADABLE_HITS,
                REASON_NOT_TRADABLE,
                self.cfg.ttl_not_tradable_sec,
            ),
            ERR_NO_ROUTE => (NO_ROUTE_HITS, REASON_NO_ROUTE, self.cfg.ttl_no_route_sec),
            _ => return None,
        };

        if count < threshold {
            return None;
        }
        if !self.allow_quarantine() {
            return None;
        }
        Some(QuarantineAction {
            symbol,
            reason,
            ttl_sec: ttl,
        })
    }

    /// Offending mint: the reported one, else whichever side of the pair
    /// is not the stable.
    fn resolve_mint(&self, event: &SkipEvent) -> Option<String> {
        let candidate = if !event.bad_mint.is_empty() {
            event.bad_mint.clone()
        } else if !event.output_mint.is_empty() && event.output_mint != self.cfg.stable_mint {
            event.output_mint.clone()
        } else if !event.input_mint.is_empty() && event.input_mint != self.cfg.stable_mint {
            event.input_mint.clone()
        } else {
            return None;
        };
        if candidate == self.cfg.stable_mint {
            return None;
        }
        Some(candidate)
    }

    fn allow_quarantine(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.rate_window_start) > Duration::from_secs(60) {
            self.rate_window_start = now;
            self.rate_count = 0;
        }
        if self.rate_count >= MAX_QUARANTINES_PER_MIN {
            return false;
        }
        self.rate_count += 1;
        true
    }
}

/// Drains the skip channel until it closes or stop fires.
pub async fn run_sanitizer(
    mut rx: mpsc::Receiver<SkipEvent>,
    manager: Arc<QuarantineManager>,
    cfg: SanitizerConfig,
    mut stop: watch::Receiver<bool>,
) {
    let mut sanitizer = Sanitizer::new(cfg);
    loop {
        let event = tokio::select! {
            e = rx.recv() => match e {
                Some(e) => e,
                None => return,
            },
            _ = stop.changed() => {
                if *stop.borrow() {
                    return;
                }
                continue;
            }
        };

        debug!(code = %event.code, bad_mint = %event.bad_mint, "quote skip event");
        if let Some(action) = sanitizer.handle(&event) {
            manager
                .add(&action.symbol, action.reason, action.ttl_sec)
                .await;
        }
    }
}
