//! Fee and buffer model for the profit gate.

use rust_decimal::Decimal;

const BPS: Decimal = Decimal::from_parts(10_000, 0, 0, false, 0);

/// Everything a signal must clear before it counts as profit:
/// CEX taker fee, latency and stable-swap buffers, the Solana tx fee,
/// and the configured minimum.
#[derive(Debug, Clone, PartialEq)]
pub struct Thresholds {
    pub bybit_taker_fee_bps: Decimal,
    pub solana_tx_fee_usd: Decimal,
    pub latency_buffer_bps: Decimal,
    pub usdt_usdc_buffer_bps: Decimal,
    pub min_profit_usd: Decimal,
}

impl Thresholds {
    pub fn required_profit_usd(&self, notional_usd: Decimal) -> Decimal {
        let cex_fee = notional_usd * (self.bybit_taker_fee_bps / BPS);
        let buffers = notional_usd * ((self.latency_buffer_bps + self.usdt_usdc_buffer_bps) / BPS);
        cex_fee + buffers + self.solana_tx_fee_usd + self.min_profit_usd
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn required_profit_sums_fees_buffers_and_minimum() {
        let t = Thresholds {
            bybit_taker_fee_bps: dec!(10),
            solana_tx_fee_usd: dec!(0.05),
            latency_buffer_bps: dec!(15),
            usdt_usdc_buffer_bps: dec!(5),
            min_profit_usd: dec!(1),
        };
        // 1000 * 0.001 + 1000 * 0.002 + 0.05 + 1
        assert_eq!(t.required_profit_usd(dec!(1000)), dec!(4.05));
    }

    #[test]
    fn scales_linearly_with_notional() {
        let t = Thresholds {
            bybit_taker_fee_bps: dec!(10),
            solana_tx_fee_usd: Decimal::ZERO,
            latency_buffer_bps: dec!(10),
            usdt_usdc_buffer_bps: dec!(10),
            min_profit_usd: dec!(1),
        };
        let r1 = t.required_profit_usd(dec!(1000)) - dec!(1);
        let r2 = t.required_profit_usd(dec!(2000)) - dec!(1);
        assert_eq!(r2, r1 * dec!(2));
    }
}
