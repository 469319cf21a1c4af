//! Configuration management.
//! Static settings come from a TOML file; secrets (the Jupiter API key)
//! come from the environment / .env.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;

use crate::types::TokenConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BybitCfg {
    pub ws_url: String,
    pub depth: u32,
    pub ping_interval_sec: u64,
    pub max_symbols_per_ws: usize,
}

impl Default for BybitCfg {
    fn default() -> Self {
        Self {
            ws_url: "wss://stream.bybit.com/v5/public/spot".to_string(),
            depth: 50,
            ping_interval_sec: 20,
            max_symbols_per_ws: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JupiterCfg {
    pub base_url: String,
    pub slippage_bps: u16,
    pub restrict_intermediate_tokens: bool,
    pub max_accounts: u32,
    pub timeout_sec: f64,
    pub poll_interval_sec: f64,
}

impl Default for JupiterCfg {
    fn default() -> Self {
        Self {
            base_url: "https://api.jup.ag/swap/v1".to_string(),
            slippage_bps: 50,
            restrict_intermediate_tokens: true,
            max_accounts: 64,
            timeout_sec: 2.0,
            poll_interval_sec: 1.5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StableCfg {
    pub symbol: String,
    pub mint: String,
    pub decimals: u32,
}

impl Default for StableCfg {
    fn default() -> Self {
        Self {
            symbol: "USDC".to_string(),
            mint: String::new(),
            decimals: 6,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TradingCfg {
    pub notional_usd: Option<Decimal>,
    pub stable: StableCfg,
    pub tokens: BTreeMap<String, TokenConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ThresholdsCfg {
    pub bybit_taker_fee_bps: Decimal,
    pub solana_tx_fee_usd: Decimal,
    pub latency_buffer_bps: Decimal,
    pub usdt_usdc_buffer_bps: Decimal,
    pub min_profit_usd: Decimal,
}

impl Default for ThresholdsCfg {
    fn default() -> Self {
        Self {
            bybit_taker_fee_bps: Decimal::from(10),
            solana_tx_fee_usd: Decimal::new(5, 2),
            latency_buffer_bps: Decimal::from(5),
            usdt_usdc_buffer_bps: Decimal::from(5),
            min_profit_usd: Decimal::ONE,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FiltersCfg {
    pub max_cex_slippage_bps: Decimal,
    pub max_dex_price_impact_pct: Decimal,
    pub persistence_hits: u32,
    pub cooldown_sec: u64,
    pub min_delta_profit_usd_to_resend: Decimal,
    pub price_ratio_max: Decimal,
    pub gross_profit_cap_pct: Decimal,
    pub max_spread_bps: Decimal,
    pub min_depth_coverage_pct: Decimal,
    pub denylist_symbols: Vec<String>,
    pub denylist_regex: Vec<String>,
}

impl Default for FiltersCfg {
    fn default() -> Self {
        Self {
            max_cex_slippage_bps: Decimal::from(30),
            max_dex_price_impact_pct: Decimal::new(5, 1),
            persistence_hits: 2,
            cooldown_sec: 60,
            min_delta_profit_usd_to_resend: Decimal::new(5, 1),
            price_ratio_max: Decimal::from(3),
            gross_profit_cap_pct: Decimal::from(10),
            max_spread_bps: Decimal::from(50),
            min_depth_coverage_pct: Decimal::from(98),
            denylist_symbols: Vec::new(),
            denylist_regex: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeCfg {
    pub engine_tick_hz: u32,
    pub max_ob_age_ms: i64,
    pub max_quote_age_ms: Option<i64>,
    pub status_interval_sec: f64,
}

impl Default for RuntimeCfg {
    fn default() -> Self {
        Self {
            engine_tick_hz: 10,
            max_ob_age_ms: 2000,
            max_quote_age_ms: None,
            status_interval_sec: 15.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitsCfg {
    pub rps: u32,
    pub concurrency: usize,
    pub max_retries: u32,
}

impl Default for RateLimitsCfg {
    fn default() -> Self {
        Self {
            rps: 5,
            concurrency: 4,
            max_retries: 4,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QuarantineCfg {
    pub file: PathBuf,
    pub verify_interval_sec: u64,
    pub ttl_not_tradable_sec: u64,
    pub ttl_no_route_sec: u64,
    pub ws_snapshot_timeout_sec: f64,
}

impl Default for QuarantineCfg {
    fn default() -> Self {
        Self {
            file: PathBuf::from("quarantine.json"),
            verify_interval_sec: 30 * 60,
            ttl_not_tradable_sec: 24 * 3600,
            ttl_no_route_sec: 2 * 3600,
            ws_snapshot_timeout_sec: 30.0,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub bybit: BybitCfg,
    pub jupiter: JupiterCfg,
    pub trading: TradingCfg,
    pub thresholds: ThresholdsCfg,
    pub filters: FiltersCfg,
    pub runtime: RuntimeCfg,
    pub rate_limits: RateLimitsCfg,
    pub quarantine: QuarantineCfg,
}

impl AppConfig {
    pub fn notional_usd(&self) -> Decimal {
        self.trading.notional_usd.unwrap_or_else(|| Decimal::from(1000))
    }

    /// Symbols of every configured token, in watchlist order.
    pub fn full_symbols(&self) -> Vec<String> {
        self.trading
            .tokens
            .values()
            .map(|t| t.bybit_symbol.clone())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let cfg: AppConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn minimal_config_parses_with_defaults() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [trading.stable]
            mint = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v"

            [trading.tokens.WIF]
            bybit_symbol = "WIFUSDT"
            mint = "EKpQGSJtjMFqKZ9KQanSqYXRcF8fBopzLHYxdM65zcjm"
            decimals = 6
        "#,
        )
        .unwrap();

        assert_eq!(cfg.bybit.depth, 50);
        assert_eq!(cfg.rate_limits.rps, 5);
        assert_eq!(cfg.notional_usd(), dec!(1000));
        assert_eq!(cfg.full_symbols(), vec!["WIFUSDT"]);
        assert_eq!(cfg.quarantine.verify_interval_sec, 1800);
    }

    #[test]
    fn overrides_win_over_defaults() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [trading]
            notional_usd = 500

            [filters]
            max_spread_bps = 75
            denylist_symbols = ["FOO"]

            [bybit]
            max_symbols_per_ws = 25
        "#,
        )
        .unwrap();
        assert_eq!(cfg.notional_usd(), dec!(500));
        assert_eq!(cfg.filters.max_spread_bps, dec!(75));
        assert_eq!(cfg.filters.denylist_symbols, vec!["FOO"]);
        assert_eq!(cfg.bybit.max_symbols_per_ws, 25);
    }
}
