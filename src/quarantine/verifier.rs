//! Periodic recovery probe for quarantined symbols.
//!
//! Only the DEX-side reasons are probed: a small BUY quote that comes
//! back non-zero proves the token trades again. WS_STALE entries expire
//! via TTL and BAD_TOKEN_CFG never recovers on its own.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::sync::watch;
use tracing::{info, warn};

use super::manager::QuarantineManager;
use super::store::{REASON_NOT_TRADABLE, REASON_NO_ROUTE};
use crate::jupiter::JupiterClient;
use crate::types::to_raw;

const MAX_CHECKS_PER_RUN: usize = 15;
const CHECK_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct VerifierConfig {
    pub stable_mint: String,
    pub stable_decimals: u32,
    pub notional_usd: Decimal,
    pub interval: Duration,
}

/// One verification pass; returns how many symbols recovered.
pub async fn verify_and_recover(
    manager: &QuarantineManager,
    jup: &JupiterClient,
    cfg: &VerifierConfig,
) -> usize {
    let q = manager.snapshot_file().await;
    if q.is_empty() {
        return 0;
    }

    let symbol_to_token: HashMap<&str, (&str, u32)> = manager
        .full_tokens()
        .values()
        .filter(|t| !t.mint.is_empty() && t.decimals > 0 && t.decimals <= 18)
        .map(|t| (t.bybit_symbol.as_str(), (t.mint.as_str(), t.decimals)))
        .collect();

    let Some(stable_raw) = to_raw(cfg.notional_usd, cfg.stable_decimals) else {
        warn!("verifier cannot derive a probe amount");
        return 0;
    };

    let mut recovered: Vec<String> = Vec::new();
    let mut checks = 0usize;

    for (symbol, entry) in &q {
        if checks >= MAX_CHECKS_PER_RUN {
            break;
        }
        if entry.reason != REASON_NOT_TRADABLE && entry.reason != REASON_NO_ROUTE {
            continue;
        }
        let Some((mint, _decimals)) = symbol_to_token.get(symbol.as_str()) else {
            continue;
        };

        let quote = jup
            .quote_exact_in(&cfg.stable_mint, mint, stable_raw)
            .await;
        checks += 1;
        if checks < MAX_CHECKS_PER_RUN {
            tokio::time::sleep(CHECK_DELAY).await;
        }

        if let Some(quote) = quote {
            if quote.out_amount_raw > 0 {
                info!(symbol = %symbol, reason = %entry.reason, "quarantine probe succeeded, recovering");
                recovered.push(symbol.clone());
            }
        }
    }

    if recovered.is_empty() {
        return 0;
    }
    let count = recovered.len();
    manager.remove_recovered(&recovered).await;
    count
}

/// Runs verification on an interval while the exchange is enabled.
pub async fn verify_loop(
    manager: Arc<QuarantineManager>,
    jup: Arc<JupiterClient>,
    cfg: VerifierConfig,
    exchange_enabled: watch::Receiver<bool>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(cfg.interval) => {}
            _ = stop.changed() => {}
        }
        if *stop.borrow() {
            return;
        }
        if !*exchange_enabled.borrow() {
            continue;
        }
        let recovered = verify_and_recover(&manager, &jup, &cfg).await;
        if recovered > 0 {
            warn!(recovered, "quarantine verify recovered symbols");
        }
    }
}
