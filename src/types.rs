//! Core data types shared across the bot.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

const BYBIT_UI_BASE: &str = "https://www.bybit.com/en/trade/spot"; // /BASE/QUOTE
const JUP_UI_BASE: &str = "https://jup.ag/swap"; // ?inputMint=...&outputMint=...

const QUOTE_SUFFIXES: [&str; 3] = ["USDT", "USDC", "USD"];

/// One watchlist entry: Bybit spot symbol plus the Solana mint it maps to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenConfig {
    pub bybit_symbol: String,
    pub mint: String,
    pub decimals: u32,
}

/// Directed trade being evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Buy on Jupiter, sell on Bybit (branch A).
    JupToBybit,
    /// Buy on Bybit, sell on Jupiter (branch B).
    BybitToJup,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::JupToBybit => write!(f, "JUP->BYBIT"),
            Direction::BybitToJup => write!(f, "BYBIT->JUP"),
        }
    }
}

pub type ButtonRow = Vec<(String, String)>;
pub type Buttons = Vec<ButtonRow>;

/// Emitted arbitrage signal. `key` identifies the opportunity for dedup
/// and for idempotent sinks; it depends only on token, direction and
/// integer notional.
#[derive(Debug, Clone)]
pub struct Signal {
    pub key: String,
    pub token: String,
    pub direction: Direction,
    pub profit_usd: Decimal,
    pub notional_usd: Decimal,
    pub text: String,
    pub buttons: Option<Buttons>,
}

pub fn signal_key(token: &str, direction: Direction, notional_usd: Decimal) -> String {
    let notional_int = notional_usd.trunc().to_i64().unwrap_or(0);
    format!("{token}:{direction}:{notional_int}")
}

/// `BASEQUOTE` -> `BASE` for the known stable quotes.
pub fn normalize_bybit_base(bybit_symbol: &str) -> String {
    let s = bybit_symbol.trim().to_uppercase();
    for q in QUOTE_SUFFIXES {
        if let Some(base) = s.strip_suffix(q) {
            if !base.is_empty() {
                return base.to_string();
            }
        }
    }
    s
}

pub fn bybit_spot_url(bybit_symbol: &str) -> String {
    let s = bybit_symbol.trim().to_uppercase();
    for q in QUOTE_SUFFIXES {
        if let Some(base) = s.strip_suffix(q) {
            if !base.is_empty() {
                return format!("{BYBIT_UI_BASE}/{base}/{q}");
            }
        }
    }
    format!("{BYBIT_UI_BASE}/{s}")
}

pub fn jup_swap_url(input_mint: &str, output_mint: &str) -> String {
    format!("{JUP_UI_BASE}?inputMint={input_mint}&outputMint={output_mint}")
}

/// `amount * 10^decimals`, truncated toward zero. `None` when negative
/// or out of range.
pub fn to_raw(amount: Decimal, decimals: u32) -> Option<u128> {
    if amount < Decimal::ZERO || decimals > 18 {
        return None;
    }
    let scale = Decimal::from(10u64.checked_pow(decimals)?);
    (amount * scale).trunc().to_u128()
}

/// `raw / 10^decimals` as an exact decimal.
pub fn from_raw(raw: u128, decimals: u32) -> Option<Decimal> {
    let raw = i128::try_from(raw).ok()?;
    Decimal::try_from_i128_with_scale(raw, decimals).ok()
}

/// Pump.fun mints carry a recognizable suffix; they churn too fast to be
/// worth quoting.
pub fn is_pump_mint(mint: &str) -> bool {
    mint.to_lowercase().ends_with("pump")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn signal_key_depends_only_on_inputs() {
        let k1 = signal_key("WIF", Direction::JupToBybit, dec!(1000));
        let k2 = signal_key("WIF", Direction::JupToBybit, dec!(1000.9));
        assert_eq!(k1, "WIF:JUP->BYBIT:1000");
        assert_eq!(k1, k2);
        assert_ne!(k1, signal_key("WIF", Direction::BybitToJup, dec!(1000)));
        assert_ne!(k1, signal_key("WIF", Direction::JupToBybit, dec!(500)));
    }

    #[test]
    fn base_normalization_strips_known_quotes() {
        assert_eq!(normalize_bybit_base("WIFUSDT"), "WIF");
        assert_eq!(normalize_bybit_base("solusdc"), "SOL");
        assert_eq!(normalize_bybit_base("BTCUSD"), "BTC");
        assert_eq!(normalize_bybit_base("WEIRD"), "WEIRD");
        // Degenerate symbol equal to a quote suffix stays as-is.
        assert_eq!(normalize_bybit_base("USDT"), "USDT");
    }

    #[test]
    fn venue_urls() {
        assert_eq!(
            bybit_spot_url("WIFUSDT"),
            "https://www.bybit.com/en/trade/spot/WIF/USDT"
        );
        assert_eq!(
            jup_swap_url("A", "B"),
            "https://jup.ag/swap?inputMint=A&outputMint=B"
        );
    }

    #[test]
    fn raw_conversions_round_trip() {
        assert_eq!(to_raw(dec!(1000), 6), Some(1_000_000_000));
        assert_eq!(from_raw(99_900_000, 6), Some(dec!(99.9)));
        // Truncation, not rounding.
        assert_eq!(to_raw(dec!(1.9999999), 6), Some(1_999_999));
        assert_eq!(to_raw(dec!(-1), 6), None);
    }

    #[test]
    fn eighteen_decimal_raws_fit() {
        let raw = to_raw(dec!(1000), 18).unwrap();
        assert_eq!(raw, 1_000_000_000_000_000_000_000u128);
        assert_eq!(from_raw(raw, 18), Some(dec!(1000)));
    }

    #[test]
    fn pump_suffix_detection() {
        assert!(is_pump_mint("Abc123PUMP"));
        assert!(is_pump_mint("xyzpump"));
        assert!(!is_pump_mint("EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v"));
    }
}
