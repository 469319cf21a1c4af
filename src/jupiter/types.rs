//! Wire types for the Jupiter quote API.

use rust_decimal::Decimal;
use serde::Deserialize;

/// Exact-in quote as consumed by the rest of the bot.
///
/// Raw amounts are integer token units (`amount * 10^decimals`); u128 keeps
/// 18-decimal mints comfortably in range.
#[derive(Debug, Clone, PartialEq)]
pub struct JupQuote {
    pub input_mint: String,
    pub output_mint: String,
    pub in_amount_raw: u128,
    pub out_amount_raw: u128,
    pub price_impact_pct: Decimal,
    pub context_slot: u64,
    pub time_taken_ms: i64,
}

/// Successful `/quote` response body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteResponse {
    pub input_mint: String,
    pub output_mint: String,
    pub in_amount: String,
    pub out_amount: String,
    #[serde(default)]
    pub price_impact_pct: Option<Decimal>,
    #[serde(default)]
    pub context_slot: u64,
    /// Seconds the router spent producing the quote.
    #[serde(default)]
    pub time_taken: f64,
}

impl QuoteResponse {
    pub fn into_quote(self) -> Option<JupQuote> {
        let in_amount_raw: u128 = self.in_amount.parse().ok()?;
        let out_amount_raw: u128 = self.out_amount.parse().ok()?;
        Some(JupQuote {
            input_mint: self.input_mint,
            output_mint: self.output_mint,
            in_amount_raw,
            out_amount_raw,
            price_impact_pct: self.price_impact_pct.unwrap_or(Decimal::ZERO),
            context_slot: self.context_slot,
            time_taken_ms: (self.time_taken * 1000.0) as i64,
        })
    }
}

/// Classified `/quote` 400 body: `{"errorCode": "...", "error": "..."}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QuoteErrorBody {
    #[serde(default, alias = "errorCode")]
    pub error_code: String,
    #[serde(default)]
    pub error: String,
}

pub const ERR_TOKEN_NOT_TRADABLE: &str = "TOKEN_NOT_TRADABLE";
pub const ERR_NO_ROUTE: &str = "COULD_NOT_FIND_ANY_ROUTE";
pub const ERR_AMOUNT_TOO_BIG: &str = "ROUTE_PLAN_DOES_NOT_CONSUME_ALL_THE_AMOUNT";

/// Emitted when a quote was refused for a classified reason.
/// Consumed by the quarantine sanitizer; delivery is best-effort.
#[derive(Debug, Clone)]
pub struct SkipEvent {
    pub code: String,
    pub input_mint: String,
    pub output_mint: String,
    pub bad_mint: String,
    pub msg: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn parses_success_body() {
        let json = r#"{
            "inputMint": "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v",
            "outputMint": "So11111111111111111111111111111111111111112",
            "inAmount": "1000000000",
            "outAmount": "99900000",
            "priceImpactPct": "0.01",
            "contextSlot": 123456,
            "timeTaken": 0.042
        }"#;
        let resp: QuoteResponse = serde_json::from_str(json).unwrap();
        let q = resp.into_quote().unwrap();
        assert_eq!(q.in_amount_raw, 1_000_000_000);
        assert_eq!(q.out_amount_raw, 99_900_000);
        assert_eq!(q.price_impact_pct, dec!(0.01));
        assert_eq!(q.context_slot, 123_456);
        assert_eq!(q.time_taken_ms, 42);
    }

    #[test]
    fn missing_optional_fields_default() {
        let json = r#"{
            "inputMint": "A",
            "outputMint": "B",
            "inAmount": "1",
            "outAmount": "2"
        }"#;
        let q: QuoteResponse = serde_json::from_str(json).unwrap();
        let q = q.into_quote().unwrap();
        assert_eq!(q.price_impact_pct, Decimal::ZERO);
        assert_eq!(q.context_slot, 0);
    }

    #[test]
    fn non_numeric_amount_is_rejected() {
        let json = r#"{"inputMint":"A","outputMint":"B","inAmount":"x","outAmount":"2"}"#;
        let q: QuoteResponse = serde_json::from_str(json).unwrap();
        assert!(q.into_quote().is_none());
    }

    #[test]
    fn parses_error_body() {
        let json = r#"{"errorCode": "TOKEN_NOT_TRADABLE", "error": "Token X not tradable"}"#;
        let body: QuoteErrorBody = serde_json::from_str(json).unwrap();
        assert_eq!(body.error_code, ERR_TOKEN_NOT_TRADABLE);
    }
}
