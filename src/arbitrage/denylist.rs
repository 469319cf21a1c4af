//! Symbol denylist: configured entries merged with built-in defaults.
//!
//! Matching is case-insensitive and checks the token key, the normalized
//! base and the full symbol. The defaults exclude tokenized equities,
//! gold wrappers and multiplier symbols like 1000BONK whose CEX price is
//! a scaled version of the on-chain asset.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use crate::types::normalize_bybit_base;

static DEFAULT_SYMBOLS: &[&str] = &[
    "XAUT", "PAXG", "AAPLX", "GOOGLX", "TSLAX", "NVDAX", "CRCLX", "HOODX",
];

static DEFAULT_REGEX: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![Regex::new(r"^(1000|10000|100000)[A-Z0-9]+$").unwrap()]
});

#[derive(Debug)]
pub struct Denylist {
    symbols: Vec<String>,
    patterns: Vec<Regex>,
}

impl Denylist {
    pub fn build(symbols: &[String], patterns: &[String]) -> Self {
        let mut merged: Vec<String> = symbols.iter().map(|s| s.to_uppercase()).collect();
        for s in DEFAULT_SYMBOLS {
            merged.push((*s).to_string());
        }
        merged.sort();
        merged.dedup();

        let mut compiled: Vec<Regex> = Vec::new();
        for raw in patterns {
            match Regex::new(&format!("(?i){raw}")) {
                Ok(re) => compiled.push(re),
                Err(e) => warn!(pattern = %raw, error = %e, "bad denylist regex, ignored"),
            }
        }
        compiled.extend(DEFAULT_REGEX.iter().cloned());

        Self {
            symbols: merged,
            patterns: compiled,
        }
    }

    pub fn is_denied(&self, token_key: &str, bybit_symbol: &str) -> bool {
        let base = normalize_bybit_base(bybit_symbol);
        for candidate in [token_key, base.as_str(), bybit_symbol] {
            if candidate.is_empty() {
                continue;
            }
            let upper = candidate.to_uppercase();
            if self.symbols.iter().any(|s| *s == upper) {
                return true;
            }
            if self.patterns.iter().any(|re| re.is_match(&upper)) {
                return true;
            }
        }
        false
    }
}
