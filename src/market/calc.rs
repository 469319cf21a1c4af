//! Small money-math helpers shared by the poller and the engine.

use rust_decimal::Decimal;

const BPS: Decimal = Decimal::from_parts(10_000, 0, 0, false, 0);
const HUNDRED: Decimal = Decimal::from_parts(100, 0, 0, false, 0);

/// Mid price and spread (bps) from sorted best-first levels.
/// `None` when either side is empty or prices are non-positive.
pub fn calc_mid_spread(
    bids: &[(Decimal, Decimal)],
    asks: &[(Decimal, Decimal)],
) -> Option<(Decimal, Decimal)> {
    let best_bid = bids.first()?.0;
    let best_ask = asks.first()?.0;
    if best_bid <= Decimal::ZERO || best_ask <= Decimal::ZERO {
        return None;
    }
    let mid = (best_bid + best_ask) / Decimal::TWO;
    if mid <= Decimal::ZERO {
        return None;
    }
    let spread_bps = (best_ask - best_bid) / mid * BPS;
    Some((mid, spread_bps))
}

/// Filled amount as a percentage of the target.
pub fn coverage_pct(got: Decimal, target: Decimal) -> Decimal {
    if target <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    got / target * HUNDRED
}

pub fn net_profit(stable_out: Decimal, notional: Decimal, required: Decimal) -> Decimal {
    stable_out - notional - required
}

/// True when implied and mid prices are within `max_ratio` of each other
/// in either direction. Guards against decimal mishaps and junk quotes.
pub fn price_ratio_ok(implied: Decimal, mid: Decimal, max_ratio: Decimal) -> bool {
    if implied <= Decimal::ZERO || mid <= Decimal::ZERO {
        return false;
    }
    let ratio = implied.max(mid) / implied.min(mid);
    ratio <= max_ratio
}

/// True when gross profit stays under the cap (pct of notional).
pub fn gross_cap_ok(stable_out: Decimal, notional: Decimal, max_gross_profit_pct: Decimal) -> bool {
    if notional <= Decimal::ZERO {
        return false;
    }
    let gross_pct = (stable_out - notional) / notional * HUNDRED;
    gross_pct <= max_gross_profit_pct
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn mid_and_spread() {
        let bids = vec![(dec!(99), dec!(1))];
        let asks = vec![(dec!(101), dec!(1))];
        let (mid, spread) = calc_mid_spread(&bids, &asks).unwrap();
        assert_eq!(mid, dec!(100));
        assert_eq!(spread, dec!(200)); // 2 / 100 * 10000
    }

    #[test]
    fn mid_none_on_empty_side() {
        assert!(calc_mid_spread(&[], &[(dec!(1), dec!(1))]).is_none());
        assert!(calc_mid_spread(&[(dec!(1), dec!(1))], &[]).is_none());
    }

    #[test]
    fn coverage() {
        assert_eq!(coverage_pct(dec!(98), dec!(100)), dec!(98));
        assert_eq!(coverage_pct(dec!(1), Decimal::ZERO), Decimal::ZERO);
    }

    #[test]
    fn ratio_guard_is_symmetric() {
        assert!(price_ratio_ok(dec!(1), dec!(2.9), dec!(3)));
        assert!(price_ratio_ok(dec!(2.9), dec!(1), dec!(3)));
        assert!(!price_ratio_ok(dec!(1), dec!(3.1), dec!(3)));
        assert!(!price_ratio_ok(Decimal::ZERO, dec!(1), dec!(3)));
    }

    #[test]
    fn gross_cap() {
        assert!(gross_cap_ok(dec!(1050), dec!(1000), dec!(10))); // +5%
        assert!(!gross_cap_ok(dec!(1200), dec!(1000), dec!(10))); // +20%
    }
}
