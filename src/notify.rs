//! Signal sink contract and presentation.
//!
//! Delivery itself (chat, webhook, dashboard) lives outside this crate;
//! the engine only needs something idempotent per signal key. Rendering
//! is kept here, next to the sink boundary, so the evaluation chain
//! never formats text.

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::info;

use crate::types::{bybit_spot_url, jup_swap_url, Buttons, Direction, Signal, signal_key};

/// Receives emitted signals. Implementations must treat a repeated key
/// as an update of the same opportunity, not a new one.
#[async_trait]
pub trait SignalSink: Send + Sync {
    async fn deliver(&self, signal: &Signal) -> anyhow::Result<()>;
}

/// Default sink: structured log line per signal.
pub struct LogSignalSink;

#[async_trait]
impl SignalSink for LogSignalSink {
    async fn deliver(&self, signal: &Signal) -> anyhow::Result<()> {
        info!(
            key = %signal.key,
            token = %signal.token,
            direction = %signal.direction,
            profit_usd = %signal.profit_usd,
            notional_usd = %signal.notional_usd,
            "ARBITRAGE SIGNAL\n{}",
            signal.text
        );
        Ok(())
    }
}

/// Everything the engine knows about one opportunity at emission time.
#[derive(Debug, Clone)]
pub struct SignalReport {
    pub token: String,
    pub direction: Direction,
    pub bybit_symbol: String,
    pub token_mint: String,
    pub stable_mint: String,
    pub notional_usd: Decimal,
    pub stable_out: Decimal,
    pub profit_usd: Decimal,
    pub required_usd: Decimal,
    pub dex_impact_pct: Decimal,
    pub cex_slippage_bps: Decimal,
    pub spread_bps: Decimal,
    pub depth_coverage_pct: Decimal,
    pub book_age_ms: i64,
}

impl SignalReport {
    pub fn into_signal(self) -> Signal {
        let key = signal_key(&self.token, self.direction, self.notional_usd);
        let text = self.render_text();
        let buttons = Some(self.buttons());
        Signal {
            key,
            token: self.token,
            direction: self.direction,
            profit_usd: self.profit_usd,
            notional_usd: self.notional_usd,
            text,
            buttons,
        }
    }

    fn render_text(&self) -> String {
        let route = match self.direction {
            Direction::JupToBybit => "Jupiter -> Bybit",
            Direction::BybitToJup => "Bybit -> Jupiter",
        };
        let net_pct = if self.notional_usd > Decimal::ZERO {
            self.profit_usd / self.notional_usd * Decimal::ONE_HUNDRED
        } else {
            Decimal::ZERO
        };
        format!(
            "ARBITRAGE {token}\n\
             Route: {route}\n\
             Notional: {notional:.0} USDC\n\
             Expected out: {out:.2} USDT\n\
             Net profit: ${profit:.2} ({net_pct:.2}%)\n\
             Fees/buffers: ${required:.2}\n\
             DEX impact: {impact:.4}% | CEX slip: {slip:.2} bps\n\
             Spread: {spread:.1} bps | Depth: {depth:.1}%\n\
             Book age: {age} ms",
            token = self.token,
            route = route,
            notional = self.notional_usd,
            out = self.stable_out,
            profit = self.profit_usd,
            net_pct = net_pct,
            required = self.required_usd,
            impact = self.dex_impact_pct,
            slip = self.cex_slippage_bps,
            spread = self.spread_bps,
            depth = self.depth_coverage_pct,
            age = self.book_age_ms,
        )
    }

    fn buttons(&self) -> Buttons {
        let bybit = bybit_spot_url(&self.bybit_symbol);
        let jup_buy = jup_swap_url(&self.stable_mint, &self.token_mint);
        let jup_sell = jup_swap_url(&self.token_mint, &self.stable_mint);
        match self.direction {
            Direction::JupToBybit => vec![vec![
                ("Buy on Jupiter".to_string(), jup_buy),
                ("Sell on Bybit".to_string(), bybit),
            ]],
            Direction::BybitToJup => vec![vec![
                ("Buy on Bybit".to_string(), bybit),
                ("Sell on Jupiter".to_string(), jup_sell),
            ]],
        }
    }
}
