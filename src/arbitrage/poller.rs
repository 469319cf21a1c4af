//! Quote poller: keeps BUY quotes (stable -> token) warm for every
//! active token.
//!
//! Sell quotes are deliberately not polled; the engine fetches them on
//! demand in the Bybit->Jupiter branch where the exact base amount is
//! known. Failing tokens back off individually so one dead mint does not
//! slow the sweep.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use std::time::{Duration, Instant};

use rand::Rng;
use rust_decimal::Decimal;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::debug;

use crate::arbitrage::stats::SkipStats;
use crate::jupiter::JupiterClient;
use crate::market::calc::calc_mid_spread;
use crate::market::state::now_ms;
use crate::market::MarketState;
use crate::quarantine::QuarantineManager;
use crate::settings::RuntimeSettings;
use crate::types::{is_pump_mint, to_raw, TokenConfig};

const POLL_CONCURRENCY: usize = 24;
const POLL_JITTER_RATIO: f64 = 0.15;
const BACKOFF_ON_NONE: Duration = Duration::from_secs(5);

struct PollerParams {
    notional: Decimal,
    max_spread_bps: Decimal,
    max_ob_age_ms: i64,
    poll_interval: Duration,
}

pub struct QuotePoller {
    state: Arc<MarketState>,
    jup: Arc<JupiterClient>,
    quarantine: Arc<QuarantineManager>,
    skip_stats: Arc<SkipStats>,
    stable_mint: String,
    stable_decimals: u32,
    params: StdRwLock<PollerParams>,
    backoff_until: StdMutex<HashMap<String, Instant>>,
    sem: Arc<Semaphore>,
}

impl QuotePoller {
    pub fn new(
        state: Arc<MarketState>,
        jup: Arc<JupiterClient>,
        quarantine: Arc<QuarantineManager>,
        skip_stats: Arc<SkipStats>,
        stable_mint: String,
        stable_decimals: u32,
        settings: &RuntimeSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            state,
            jup,
            quarantine,
            skip_stats,
            stable_mint,
            stable_decimals,
            params: StdRwLock::new(params_from(settings)),
            backoff_until: StdMutex::new(HashMap::new()),
            sem: Arc::new(Semaphore::new(POLL_CONCURRENCY)),
        })
    }

    pub fn reload_settings(&self, settings: &RuntimeSettings) {
        *self.params.write().unwrap_or_else(|e| e.into_inner()) = params_from(settings);
    }

    pub async fn run(
        self: Arc<Self>,
        mut stop: watch::Receiver<bool>,
        mut exchange_enabled: watch::Receiver<bool>,
    ) {
        loop {
            if *stop.borrow() {
                return;
            }
            if !*exchange_enabled.borrow() {
                tokio::select! {
                    _ = exchange_enabled.changed() => {}
                    _ = stop.changed() => {}
                }
                continue;
            }

            let started = Instant::now();
            self.sweep_once().await;

            let interval = {
                let p = self.params.read().unwrap_or_else(|e| e.into_inner());
                p.poll_interval
            };
            let jitter = interval.mul_f64(rand::thread_rng().gen_range(0.0..POLL_JITTER_RATIO));
            let sleep_for = interval.saturating_sub(started.elapsed()) + jitter;
            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = stop.changed() => {}
            }
        }
    }

    /// One pass over the active token list with bounded concurrency.
    pub async fn sweep_once(self: &Arc<Self>) {
        let active = self.quarantine.active();
        let mut set = JoinSet::new();

        for (token_key, cfg) in active.tokens.clone() {
            if !self.poll_allowed(&token_key) {
                self.skip_stats.inc("poll_skip_backoff");
                continue;
            }
            let this = self.clone();
            let active = active.clone();
            let sem = self.sem.clone();
            set.spawn(async move {
                let Ok(_permit) = sem.acquire().await else {
                    return;
                };
                this.poll_one(&token_key, &cfg, &active.denylist).await;
            });
        }

        while set.join_next().await.is_some() {}
    }

    async fn poll_one(
        &self,
        token_key: &str,
        cfg: &TokenConfig,
        denylist: &crate::arbitrage::denylist::Denylist,
    ) {
        if is_pump_mint(&cfg.mint) {
            self.skip_stats.inc("poll_skip_pump_mint");
            return;
        }
        if denylist.is_denied(token_key, &cfg.bybit_symbol) {
            self.skip_stats.inc("poll_skip_denied");
            return;
        }
        if cfg.decimals == 0 || cfg.decimals > 18 {
            self.skip_stats.inc("poll_skip_bad_decimals");
            return;
        }

        let (notional, max_spread_bps, max_ob_age_ms) = {
            let p = self.params.read().unwrap_or_else(|e| e.into_inner());
            (p.notional, p.max_spread_bps, p.max_ob_age_ms)
        };

        let Some(book) = self.state.get_orderbook(&cfg.bybit_symbol) else {
            self.skip_stats.inc("poll_skip_no_ob");
            return;
        };
        let (bids, asks, age_ms) = {
            let ob = book.read().unwrap_or_else(|e| e.into_inner());
            if ob.is_empty() {
                self.skip_stats.inc("poll_skip_no_ob");
                return;
            }
            let (bids, asks) = ob.snapshot();
            (bids, asks, ob.age_ms())
        };
        if age_ms > max_ob_age_ms {
            self.skip_stats.inc("poll_skip_ob_stale");
            return;
        }
        let Some((_mid, spread_bps)) = calc_mid_spread(&bids, &asks) else {
            self.skip_stats.inc("poll_skip_no_spread");
            return;
        };
        if spread_bps > max_spread_bps {
            self.skip_stats.inc("poll_skip_spread");
            return;
        }

        let Some(stable_raw) = to_raw(notional, self.stable_decimals) else {
            self.skip_stats.inc("poll_skip_bad_notional");
            return;
        };

        let quote = self
            .jup
            .quote_exact_in(&self.stable_mint, &cfg.mint, stable_raw)
            .await;

        match quote {
            Some(q) => {
                let pair = self.state.get_quote_pair(token_key);
                let mut qp = pair.lock().await;
                qp.buy_quote = Some(q);
                qp.buy_updated_ms = now_ms();
                drop(qp);
                self.clear_backoff(token_key);
            }
            None => {
                self.skip_stats.inc("poll_buy_quote_none");
                self.set_backoff(token_key, BACKOFF_ON_NONE);
                debug!(token_key, "buy quote unavailable, backing off");
            }
        }
    }

    fn poll_allowed(&self, token_key: &str) -> bool {
        let map = self.backoff_until.lock().unwrap_or_else(|e| e.into_inner());
        map.get(token_key).map_or(true, |t| Instant::now() >= *t)
    }

    fn set_backoff(&self, token_key: &str, delay: Duration) {
        let mut map = self.backoff_until.lock().unwrap_or_else(|e| e.into_inner());
        map.insert(token_key.to_string(), Instant::now() + delay);
    }

    fn clear_backoff(&self, token_key: &str) {
        let mut map = self.backoff_until.lock().unwrap_or_else(|e| e.into_inner());
        map.remove(token_key);
    }
}

fn params_from(s: &RuntimeSettings) -> PollerParams {
    PollerParams {
        notional: s.notional_usd,
        max_spread_bps: s.max_spread_bps,
        max_ob_age_ms: s.max_ob_age_ms,
        poll_interval: Duration::from_secs_f64(s.jupiter_poll_interval_sec.max(0.1)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_gates_polling() {
        let s = RuntimeSettings::default();
        let (tx, _rx) = tokio::sync::mpsc::channel(1);
        let quarantine = QuarantineManager::new(
            std::env::temp_dir().join("poller-test-quarantine.json"),
            crate::quarantine::Watchlist::default(),
            tx,
        );
        let poller = QuotePoller::new(
            Arc::new(MarketState::new()),
            test_client(),
            quarantine,
            Arc::new(SkipStats::new(Duration::from_secs(30))),
            "STABLE".to_string(),
            6,
            &s,
        );

        assert!(poller.poll_allowed("WIF"));
        poller.set_backoff("WIF", Duration::from_secs(60));
        assert!(!poller.poll_allowed("WIF"));
        poller.clear_backoff("WIF");
        assert!(poller.poll_allowed("WIF"));
    }

    fn test_client() -> Arc<JupiterClient> {
        Arc::new(
            JupiterClient::new(
                crate::jupiter::JupiterClientConfig {
                    base_url: "http://127.0.0.1:9".to_string(),
                    api_key: String::new(),
                    timeout: Duration::from_millis(50),
                    slippage_bps: 50,
                    restrict_intermediate_tokens: true,
                    max_accounts: 64,
                    rps: 0,
                    concurrency: 1,
                    max_retries: 1,
                },
                None,
            )
            .unwrap(),
        )
    }
}
