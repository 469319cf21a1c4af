//! Runtime-tunable settings.
//!
//! Defaults come from the config file; a JSON overlay (`settings.json`)
//! persists live changes across restarts. SIGHUP re-reads the overlay and
//! the new bag fans out through `reload_settings` on the engine and the
//! poller.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    // Thresholds
    pub bybit_taker_fee_bps: Decimal,
    pub solana_tx_fee_usd: Decimal,
    pub latency_buffer_bps: Decimal,
    pub usdt_usdc_buffer_bps: Decimal,
    pub min_profit_usd: Decimal,

    // Trading
    pub notional_usd: Decimal,

    // Filters
    pub max_cex_slippage_bps: Decimal,
    pub max_dex_price_impact_pct: Decimal,
    pub persistence_hits: u32,
    pub cooldown_sec: u64,
    pub min_delta_profit_usd_to_resend: Decimal,
    pub price_ratio_max: Decimal,
    pub gross_profit_cap_pct: Decimal,
    pub max_spread_bps: Decimal,
    pub min_depth_coverage_pct: Decimal,

    // Runtime
    pub engine_tick_hz: u32,
    pub jupiter_poll_interval_sec: f64,
    pub max_ob_age_ms: i64,
    /// Explicit override; when absent the age limit is derived from the
    /// poll interval.
    pub max_quote_age_ms: Option<i64>,

    /// Master switch for WS cluster, poller, engine and verifier.
    pub exchange_enabled: bool,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            bybit_taker_fee_bps: Decimal::from(10),
            solana_tx_fee_usd: Decimal::new(5, 2), // 0.05
            latency_buffer_bps: Decimal::from(15),
            usdt_usdc_buffer_bps: Decimal::from(10),
            min_profit_usd: Decimal::from(10),
            notional_usd: Decimal::from(1000),
            max_cex_slippage_bps: Decimal::from(80),
            max_dex_price_impact_pct: Decimal::from(3),
            persistence_hits: 1,
            cooldown_sec: 3,
            min_delta_profit_usd_to_resend: Decimal::from(2),
            price_ratio_max: Decimal::from(3),
            gross_profit_cap_pct: Decimal::from(10),
            max_spread_bps: Decimal::from(150),
            min_depth_coverage_pct: Decimal::from(60),
            engine_tick_hz: 2,
            jupiter_poll_interval_sec: 10.0,
            max_ob_age_ms: 2000,
            max_quote_age_ms: None,
            exchange_enabled: true,
        }
    }
}

impl RuntimeSettings {
    /// Quote freshness limit: explicit override or
    /// `max(5000, 3 * poll_interval)` so a growing token list cannot
    /// silently trade on stale quotes.
    pub fn effective_max_quote_age_ms(&self) -> i64 {
        match self.max_quote_age_ms {
            Some(v) => v,
            None => ((self.jupiter_poll_interval_sec * 3.0 * 1000.0) as i64).max(5000),
        }
    }
}

/// Overlay `settings.json` on top of `defaults`. A missing or unreadable
/// file just yields the defaults.
pub fn load_runtime_settings(path: &Path, defaults: &RuntimeSettings) -> RuntimeSettings {
    let Ok(text) = fs::read_to_string(path) else {
        return defaults.clone();
    };
    let Ok(overlay) = serde_json::from_str::<serde_json::Value>(&text) else {
        return defaults.clone();
    };

    // Merge field-by-field: unknown keys are ignored, bad values keep
    // their default.
    let mut base = match serde_json::to_value(defaults) {
        Ok(v) => v,
        Err(_) => return defaults.clone(),
    };
    if let (Some(base_map), Some(overlay_map)) = (base.as_object_mut(), overlay.as_object()) {
        for (k, v) in overlay_map {
            if base_map.contains_key(k) {
                base_map.insert(k.clone(), v.clone());
            }
        }
    }
    serde_json::from_value(base).unwrap_or_else(|_| defaults.clone())
}

pub fn save_runtime_settings(path: &Path, settings: &RuntimeSettings) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create settings dir {}", parent.display()))?;
        }
    }
    let json = serde_json::to_string_pretty(settings).context("serialize settings")?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).with_context(|| format!("write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("rename into {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn derived_quote_age_has_floor() {
        let mut s = RuntimeSettings {
            jupiter_poll_interval_sec: 1.0,
            ..Default::default()
        };
        assert_eq!(s.effective_max_quote_age_ms(), 5000);
        s.jupiter_poll_interval_sec = 10.0;
        assert_eq!(s.effective_max_quote_age_ms(), 30_000);
        s.max_quote_age_ms = Some(1234);
        assert_eq!(s.effective_max_quote_age_ms(), 1234);
    }

    #[test]
    fn missing_overlay_returns_defaults() {
        let defaults = RuntimeSettings::default();
        let loaded = load_runtime_settings(Path::new("/nonexistent/settings.json"), &defaults);
        assert_eq!(loaded, defaults);
    }

    #[test]
    fn overlay_merges_known_keys_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(
            &path,
            r#"{"min_profit_usd": 25, "unknown_key": true, "cooldown_sec": 120}"#,
        )
        .unwrap();

        let defaults = RuntimeSettings::default();
        let loaded = load_runtime_settings(&path, &defaults);
        assert_eq!(loaded.min_profit_usd, dec!(25));
        assert_eq!(loaded.cooldown_sec, 120);
        assert_eq!(loaded.notional_usd, defaults.notional_usd);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let mut s = RuntimeSettings::default();
        s.exchange_enabled = false;
        s.notional_usd = dec!(2500);
        save_runtime_settings(&path, &s).unwrap();

        let loaded = load_runtime_settings(&path, &RuntimeSettings::default());
        assert_eq!(loaded, s);
    }
}
