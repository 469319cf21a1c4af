//! Arbitrage engine: per-tick, two-direction evaluation over every
//! active token.
//!
//! Branch A buys on Jupiter with the polled quote and simulates the sell
//! into Bybit bids. Branch B simulates the buy from Bybit asks and sells
//! the filled base on Jupiter, re-quoting on demand when the cached sell
//! quote no longer matches the amount the book would fill. Both branches
//! run the same sanity chain and feed per-branch persistence counters and
//! the shared dedup table before anything reaches the sink.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use std::time::{Duration, Instant};

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::warn;

use crate::arbitrage::dedup::Dedup;
use crate::arbitrage::denylist::Denylist;
use crate::arbitrage::persistence::Persistence;
use crate::arbitrage::stats::SkipStats;
use crate::fees::Thresholds;
use crate::jupiter::{JupQuote, JupiterClient};
use crate::market::calc::{calc_mid_spread, coverage_pct, gross_cap_ok, net_profit, price_ratio_ok};
use crate::market::state::now_ms;
use crate::market::vwap::{simulate_buy_with_notional, simulate_sell_base};
use crate::market::MarketState;
use crate::notify::{SignalReport, SignalSink};
use crate::quarantine::QuarantineManager;
use crate::settings::RuntimeSettings;
use crate::types::{from_raw, is_pump_mint, signal_key, to_raw, Direction, TokenConfig};

const ENGINE_CONCURRENCY: usize = 64;
const B_REQUOTE_COOLDOWN: Duration = Duration::from_secs(2);

/// Tolerated drift between the cached sell-quote amount and the amount
/// the book would fill right now: |expected/cached - 1| <= 0.3%.
const REQUOTE_BAND_LOW: Decimal = Decimal::from_parts(997, 0, 0, false, 3);
const REQUOTE_BAND_HIGH: Decimal = Decimal::from_parts(1003, 0, 0, false, 3);

#[derive(Debug, Clone)]
struct EngineParams {
    notional: Decimal,
    thresholds: Thresholds,
    max_cex_slippage_bps: Decimal,
    max_dex_price_impact_pct: Decimal,
    price_ratio_max: Decimal,
    gross_profit_cap_pct: Decimal,
    max_spread_bps: Decimal,
    min_depth_coverage_pct: Decimal,
    max_ob_age_ms: i64,
    max_quote_age_ms: i64,
    tick_interval: Duration,
}

fn params_from(s: &RuntimeSettings) -> EngineParams {
    EngineParams {
        notional: s.notional_usd,
        thresholds: Thresholds {
            bybit_taker_fee_bps: s.bybit_taker_fee_bps,
            solana_tx_fee_usd: s.solana_tx_fee_usd,
            latency_buffer_bps: s.latency_buffer_bps,
            usdt_usdc_buffer_bps: s.usdt_usdc_buffer_bps,
            min_profit_usd: s.min_profit_usd,
        },
        max_cex_slippage_bps: s.max_cex_slippage_bps,
        max_dex_price_impact_pct: s.max_dex_price_impact_pct,
        price_ratio_max: s.price_ratio_max,
        gross_profit_cap_pct: s.gross_profit_cap_pct,
        max_spread_bps: s.max_spread_bps,
        min_depth_coverage_pct: s.min_depth_coverage_pct,
        max_ob_age_ms: s.max_ob_age_ms,
        max_quote_age_ms: s.effective_max_quote_age_ms(),
        tick_interval: Duration::from_secs_f64(1.0 / s.engine_tick_hz.max(1) as f64),
    }
}

pub struct ArbEngine {
    state: Arc<MarketState>,
    jup: Arc<JupiterClient>,
    quarantine: Arc<QuarantineManager>,
    skip_stats: Arc<SkipStats>,
    sink: Arc<dyn SignalSink>,
    stable_mint: String,
    stable_decimals: u32,
    params: StdRwLock<EngineParams>,
    persistence: StdMutex<Persistence>,
    dedup: StdMutex<Dedup>,
    requote_last: StdMutex<HashMap<String, Instant>>,
    sem: Arc<Semaphore>,
}

impl ArbEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state: Arc<MarketState>,
        jup: Arc<JupiterClient>,
        quarantine: Arc<QuarantineManager>,
        skip_stats: Arc<SkipStats>,
        sink: Arc<dyn SignalSink>,
        stable_mint: String,
        stable_decimals: u32,
        settings: &RuntimeSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            state,
            jup,
            quarantine,
            skip_stats,
            sink,
            stable_mint,
            stable_decimals,
            params: StdRwLock::new(params_from(settings)),
            persistence: StdMutex::new(Persistence::new(settings.persistence_hits)),
            dedup: StdMutex::new(Dedup::new(
                settings.cooldown_sec,
                settings.min_delta_profit_usd_to_resend,
            )),
            requote_last: StdMutex::new(HashMap::new()),
            sem: Arc::new(Semaphore::new(ENGINE_CONCURRENCY)),
        })
    }

    pub fn reload_settings(&self, settings: &RuntimeSettings) {
        *self.params.write().unwrap_or_else(|e| e.into_inner()) = params_from(settings);
        self.persistence
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .reconfigure(settings.persistence_hits);
        self.dedup
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .reconfigure(settings.cooldown_sec, settings.min_delta_profit_usd_to_resend);
    }

    /// Drained at most once per window by the status loop.
    pub fn drain_debug_stats(&self) -> Option<HashMap<&'static str, u64>> {
        self.skip_stats.flush_if_due()
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
            self.tick_once().await;

            let tick = {
                let p = self.params.read().unwrap_or_else(|e| e.into_inner());
                p.tick_interval
            };
            let sleep_for = tick.saturating_sub(started.elapsed());
            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = stop.changed() => {}
            }
        }
    }

    /// Evaluate every active token once, with bounded fan-out. A failing
    /// token never stalls the others.
    pub async fn tick_once(self: &Arc<Self>) {
        let active = self.quarantine.active();
        let params = Arc::new(
            self.params
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
        );

        let mut set = JoinSet::new();
        for (token_key, cfg) in active.tokens.clone() {
            let this = self.clone();
            let params = params.clone();
            let active = active.clone();
            let sem = self.sem.clone();
            set.spawn(async move {
                let Ok(_permit) = sem.acquire().await else {
                    return;
                };
                this.eval_token(&token_key, &cfg, &active.denylist, &params)
                    .await;
            });
        }
        while let Some(joined) = set.join_next().await {
            if joined.is_err() {
                self.skip_stats.inc("engine_task_panic");
            }
        }

        // Streak counters for tokens that left the active set are dead
        // weight; drop them so the table tracks the watchlist.
        self.persistence
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain_keys(|key| {
                key.rsplit_once(':')
                    .map_or(false, |(token, _)| active.tokens.contains_key(token))
            });
    }

    async fn eval_token(
        self: &Arc<Self>,
        token_key: &str,
        cfg: &TokenConfig,
        denylist: &Denylist,
        params: &EngineParams,
    ) {
        // Hard gates reset both branch streaks.
        if is_pump_mint(&cfg.mint) {
            self.skip_stats.inc("skip_pump_mint");
            self.reset_persistence(token_key);
            return;
        }
        if denylist.is_denied(token_key, &cfg.bybit_symbol) {
            self.skip_stats.inc("skip_denied");
            self.reset_persistence(token_key);
            return;
        }
        if cfg.decimals == 0 || cfg.decimals > 18 {
            self.skip_stats.inc("skip_bad_decimals");
            self.reset_persistence(token_key);
            return;
        }

        let Some(book) = self.state.get_orderbook(&cfg.bybit_symbol) else {
            self.skip_stats.inc("skip_no_ob");
            self.reset_persistence(token_key);
            return;
        };
        let (bids, asks, book_age_ms) = {
            let ob = book.read().unwrap_or_else(|e| e.into_inner());
            if ob.is_empty() {
                self.skip_stats.inc("skip_no_ob");
                drop(ob);
                self.reset_persistence(token_key);
                return;
            }
            let (bids, asks) = ob.snapshot();
            (bids, asks, ob.age_ms())
        };
        if book_age_ms > params.max_ob_age_ms {
            self.skip_stats.inc("skip_ob_stale");
            self.reset_persistence(token_key);
            return;
        }

        let Some((mid, spread_bps)) = calc_mid_spread(&bids, &asks) else {
            self.skip_stats.inc("skip_no_mid");
            self.reset_persistence(token_key);
            return;
        };
        if spread_bps > params.max_spread_bps {
            self.skip_stats.inc("skip_spread");
            self.reset_persistence(token_key);
            return;
        }

        // Snapshot quotes under the pair lock; stale entries are nulled
        // there and then so nobody else trades on them either.
        let pair = self.state.get_quote_pair(token_key);
        let (j_buy, j_sell, sell_amount_raw, sell_updated_ms) = {
            let mut qp = pair.lock().await;
            let now = now_ms();
            if qp.buy_quote.is_some() && now - qp.buy_updated_ms > params.max_quote_age_ms {
                self.skip_stats.inc("skip_stale_buy_quote");
                qp.buy_quote = None;
                qp.buy_updated_ms = 0;
            }
            if qp.sell_quote.is_some() && now - qp.sell_updated_ms > params.max_quote_age_ms {
                self.skip_stats.inc("skip_stale_sell_quote");
                qp.sell_quote = None;
                qp.sell_updated_ms = 0;
                qp.sell_amount_raw = 0;
            }
            (
                qp.buy_quote.clone(),
                qp.sell_quote.clone(),
                qp.sell_amount_raw,
                qp.sell_updated_ms,
            )
        };

        let required = params.thresholds.required_profit_usd(params.notional);

        let a_valid = self
            .eval_branch_a(
                token_key, cfg, params, &bids, mid, spread_bps, book_age_ms, required, &j_buy,
            )
            .await;
        if !a_valid {
            self.persistence
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .hit(&format!("{token_key}:A"), false);
        }

        let b_valid = self
            .eval_branch_b(
                token_key,
                cfg,
                params,
                &asks,
                mid,
                spread_bps,
                book_age_ms,
                required,
                j_sell,
                sell_amount_raw,
                sell_updated_ms,
                &pair,
            )
            .await;
        if !b_valid {
            self.persistence
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .hit(&format!("{token_key}:B"), false);
        }
    }

    /// Jupiter -> Bybit: spend the notional on the DEX, dump the tokens
    /// into the bids. Returns whether this tick counted as valid.
    #[allow(clippy::too_many_arguments)]
    async fn eval_branch_a(
        self: &Arc<Self>,
        token_key: &str,
        cfg: &TokenConfig,
        params: &EngineParams,
        bids: &[(Decimal, Decimal)],
        mid: Decimal,
        spread_bps: Decimal,
        book_age_ms: i64,
        required: Decimal,
        j_buy: &Option<JupQuote>,
    ) -> bool {
        let Some(buy) = j_buy else {
            self.skip_stats.inc("A_no_buy_quote");
            return false;
        };
        if buy.output_mint != cfg.mint || buy.input_mint != self.stable_mint {
            self.skip_stats.inc("A_skip_mint_mismatch");
            return false;
        }
        if buy.price_impact_pct > params.max_dex_price_impact_pct {
            self.skip_stats.inc("A_skip_dex_impact");
            return false;
        }

        let token_out = from_raw(buy.out_amount_raw, cfg.decimals).unwrap_or(Decimal::ZERO);
        if token_out <= Decimal::ZERO {
            self.skip_stats.inc("A_skip_token_out_le0");
            return false;
        }

        let Some(sim_sell) = simulate_sell_base(bids, token_out) else {
            self.skip_stats.inc("A_skip_sim_sell_none");
            return false;
        };
        let depth_cov = coverage_pct(sim_sell.base_out, token_out);
        if depth_cov < params.min_depth_coverage_pct {
            self.skip_stats.inc("A_skip_depth");
            return false;
        }
        if sim_sell.slippage_bps > params.max_cex_slippage_bps {
            self.skip_stats.inc("A_skip_cex_slip");
            return false;
        }

        let stable_out = sim_sell.quote_out;
        if stable_out <= Decimal::ZERO {
            self.skip_stats.inc("A_skip_stable_out_le0");
            return false;
        }

        let implied = params.notional / token_out;
        if !price_ratio_ok(implied, mid, params.price_ratio_max) {
            self.skip_stats.inc("A_skip_price_ratio");
            return false;
        }
        if !gross_cap_ok(stable_out, params.notional, params.gross_profit_cap_pct) {
            self.skip_stats.inc("A_skip_gross_cap");
            return false;
        }

        let profit = net_profit(stable_out, params.notional, required);
        if profit <= Decimal::ZERO {
            self.skip_stats.inc("A_skip_profit_le0");
            return false;
        }

        self.emit_if_ready(
            token_key,
            Direction::JupToBybit,
            SignalReport {
                token: token_key.to_string(),
                direction: Direction::JupToBybit,
                bybit_symbol: cfg.bybit_symbol.clone(),
                token_mint: cfg.mint.clone(),
                stable_mint: self.stable_mint.clone(),
                notional_usd: params.notional,
                stable_out,
                profit_usd: profit,
                required_usd: required,
                dex_impact_pct: buy.price_impact_pct,
                cex_slippage_bps: sim_sell.slippage_bps,
                spread_bps,
                depth_coverage_pct: depth_cov,
                book_age_ms,
            },
        )
        .await;
        true
    }

    /// Bybit -> Jupiter: fill the notional from the asks, sell the base
    /// on the DEX. Re-quotes the sell leg when the cached quote no
    /// longer matches what the book would fill.
    #[allow(clippy::too_many_arguments)]
    async fn eval_branch_b(
        self: &Arc<Self>,
        token_key: &str,
        cfg: &TokenConfig,
        params: &EngineParams,
        asks: &[(Decimal, Decimal)],
        mid: Decimal,
        spread_bps: Decimal,
        book_age_ms: i64,
        required: Decimal,
        mut j_sell: Option<JupQuote>,
        sell_amount_raw: u128,
        sell_updated_ms: i64,
        pair: &crate::market::state::SharedQuotePair,
    ) -> bool {
        let Some(sim_buy) = simulate_buy_with_notional(asks, params.notional) else {
            self.skip_stats.inc("B_skip_sim_buy_none");
            return false;
        };
        let depth_cov = coverage_pct(sim_buy.quote_out, params.notional);
        if depth_cov < params.min_depth_coverage_pct {
            self.skip_stats.inc("B_skip_depth");
            return false;
        }
        if sim_buy.slippage_bps > params.max_cex_slippage_bps {
            self.skip_stats.inc("B_skip_cex_slip");
            return false;
        }

        let token_out = sim_buy.base_out;
        if token_out <= Decimal::ZERO {
            self.skip_stats.inc("B_skip_token_out_le0");
            return false;
        }
        let Some(expected_raw) = to_raw(token_out, cfg.decimals) else {
            self.skip_stats.inc("B_skip_token_out_le0");
            return false;
        };

        let need_requote = match &j_sell {
            None => {
                self.skip_stats.inc("B_sell_missing_requote");
                true
            }
            Some(sell) if sell.input_mint != cfg.mint || sell.output_mint != self.stable_mint => {
                self.skip_stats.inc("B_skip_mint_mismatch");
                true
            }
            Some(sell) if sell.price_impact_pct > params.max_dex_price_impact_pct => {
                self.skip_stats.inc("B_skip_dex_impact");
                true
            }
            Some(_) if sell_updated_ms <= 0 => {
                self.skip_stats.inc("B_sell_stale_requote");
                true
            }
            Some(_) if sell_amount_raw == 0 => {
                self.skip_stats.inc("B_sell_amount_raw_missing_requote");
                true
            }
            Some(_) => {
                let ratio = Decimal::from_u128(expected_raw)
                    .zip(Decimal::from_u128(sell_amount_raw))
                    .map(|(e, s)| e / s);
                match ratio {
                    Some(r) if r >= REQUOTE_BAND_LOW && r <= REQUOTE_BAND_HIGH => false,
                    _ => {
                        self.skip_stats.inc("B_amount_mismatch_requote");
                        true
                    }
                }
            }
        };

        if need_requote {
            if !self.requote_allowed(token_key) {
                self.skip_stats.inc("B_skip_requote_cooldown");
            } else {
                let fresh = self
                    .jup
                    .quote_exact_in(&cfg.mint, &self.stable_mint, expected_raw)
                    .await;
                match fresh {
                    None => {
                        self.skip_stats.inc("B_requote_none");
                    }
                    Some(fresh) if fresh.price_impact_pct > params.max_dex_price_impact_pct => {
                        self.skip_stats.inc("B_requote_skip_dex_impact");
                    }
                    Some(fresh) => {
                        let mut qp = pair.lock().await;
                        qp.sell_quote = Some(fresh.clone());
                        qp.sell_amount_raw = expected_raw;
                        qp.sell_updated_ms = now_ms();
                        drop(qp);
                        j_sell = Some(fresh);
                    }
                }
            }
        }

        let Some(sell) = &j_sell else {
            self.skip_stats.inc("B_skip_no_sell_quote_after_requote");
            return false;
        };

        let stable_out =
            from_raw(sell.out_amount_raw, self.stable_decimals).unwrap_or(Decimal::ZERO);
        if stable_out <= Decimal::ZERO {
            self.skip_stats.inc("B_skip_stable_out_le0");
            return false;
        }

        let implied = stable_out / token_out;
        if !price_ratio_ok(implied, mid, params.price_ratio_max) {
            self.skip_stats.inc("B_skip_price_ratio");
            return false;
        }
        if !gross_cap_ok(stable_out, params.notional, params.gross_profit_cap_pct) {
            self.skip_stats.inc("B_skip_gross_cap");
            return false;
        }

        let profit = net_profit(stable_out, params.notional, required);
        if profit <= Decimal::ZERO {
            self.skip_stats.inc("B_skip_profit_le0");
            return false;
        }

        self.emit_if_ready(
            token_key,
            Direction::BybitToJup,
            SignalReport {
                token: token_key.to_string(),
                direction: Direction::BybitToJup,
                bybit_symbol: cfg.bybit_symbol.clone(),
                token_mint: cfg.mint.clone(),
                stable_mint: self.stable_mint.clone(),
                notional_usd: params.notional,
                stable_out,
                profit_usd: profit,
                required_usd: required,
                dex_impact_pct: sell.price_impact_pct,
                cex_slippage_bps: sim_buy.slippage_bps,
                spread_bps,
                depth_coverage_pct: depth_cov,
                book_age_ms,
            },
        )
        .await;
        true
    }

    /// Persistence and dedup gates, then delivery. Called only for ticks
    /// that already passed the whole validity chain.
    async fn emit_if_ready(
        self: &Arc<Self>,
        token_key: &str,
        direction: Direction,
        report: SignalReport,
    ) {
        let branch = match direction {
            Direction::JupToBybit => "A",
            Direction::BybitToJup => "B",
        };
        let branch_key = format!("{token_key}:{branch}");
        let stats_key: &'static str = match direction {
            Direction::JupToBybit => "A_skip_persistence",
            Direction::BybitToJup => "B_skip_persistence",
        };

        let ready = self
            .persistence
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .hit(&branch_key, true);
        if !ready {
            self.skip_stats.inc(stats_key);
            return;
        }

        let sig_key = signal_key(token_key, direction, report.notional_usd);
        let can_send = self
            .dedup
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .can_send(&sig_key, report.profit_usd);
        if !can_send {
            self.skip_stats.inc(match direction {
                Direction::JupToBybit => "A_skip_dedup",
                Direction::BybitToJup => "B_skip_dedup",
            });
            return;
        }

        let profit = report.profit_usd;
        let signal = report.into_signal();
        // Dedup is committed regardless of delivery outcome; sink
        // failures never reach engine state.
        self.dedup
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .mark_sent(&sig_key, profit);
        if let Err(e) = self.sink.deliver(&signal).await {
            warn!(key = %signal.key, error = %e, "signal delivery failed");
        }
    }

    fn reset_persistence(&self, token_key: &str) {
        let mut p = self.persistence.lock().unwrap_or_else(|e| e.into_inner());
        p.reset(&format!("{token_key}:A"));
        p.reset(&format!("{token_key}:B"));
    }

    fn requote_allowed(&self, token_key: &str) -> bool {
        let mut map = self.requote_last.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        match map.get(token_key) {
            Some(last) if now.duration_since(*last) < B_REQUOTE_COOLDOWN => false,
            _ => {
                map.insert(token_key.to_string(), now);
                true
            }
        }
    }
}
