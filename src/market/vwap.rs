//! VWAP fill simulation over sorted book levels.
//!
//! Pure functions: the caller supplies levels already sorted best-first
//! (asks ascending, bids descending), typically from `OrderBook::snapshot`.

use rust_decimal::Decimal;

const BPS: Decimal = Decimal::from_parts(10_000, 0, 0, false, 0);

#[derive(Debug, Clone, PartialEq)]
pub struct SimResult {
    /// Base amount bought/sold.
    pub base_out: Decimal,
    /// Quote (stable) amount spent/received.
    pub quote_out: Decimal,
    pub avg_price: Decimal,
    pub slippage_bps: Decimal,
}

/// Spend up to `notional` quote walking asks cheapest-first.
/// Returns `None` when the ask side is empty or nothing can be filled.
pub fn simulate_buy_with_notional(
    asks: &[(Decimal, Decimal)],
    notional: Decimal,
) -> Option<SimResult> {
    if asks.is_empty() || notional <= Decimal::ZERO {
        return None;
    }

    let best_ask = asks[0].0;
    let mut remaining_quote = notional;
    let mut base_got = Decimal::ZERO;
    let mut quote_spent = Decimal::ZERO;

    for &(price, qty) in asks {
        if remaining_quote <= Decimal::ZERO {
            break;
        }
        if price <= Decimal::ZERO || qty <= Decimal::ZERO {
            continue;
        }

        let max_base_at_level = remaining_quote / price;
        let take_base = qty.min(max_base_at_level);

        let spent = take_base * price;
        base_got += take_base;
        quote_spent += spent;
        remaining_quote -= spent;
    }

    if base_got.is_zero() {
        return None;
    }

    let avg_price = quote_spent / base_got;
    let slippage_bps = (avg_price / best_ask - Decimal::ONE) * BPS;

    Some(SimResult {
        base_out: base_got,
        quote_out: quote_spent,
        avg_price,
        slippage_bps,
    })
}

/// Sell up to `base_amount` walking bids best-first.
pub fn simulate_sell_base(
    bids: &[(Decimal, Decimal)],
    base_amount: Decimal,
) -> Option<SimResult> {
    if bids.is_empty() || base_amount <= Decimal::ZERO {
        return None;
    }

    let best_bid = bids[0].0;
    let mut remaining_base = base_amount;
    let mut quote_got = Decimal::ZERO;
    let mut base_sold = Decimal::ZERO;

    for &(price, qty) in bids {
        if remaining_base <= Decimal::ZERO {
            break;
        }
        if price <= Decimal::ZERO || qty <= Decimal::ZERO {
            continue;
        }

        let take_base = qty.min(remaining_base);
        base_sold += take_base;
        quote_got += take_base * price;
        remaining_base -= take_base;
    }

    if base_sold.is_zero() {
        return None;
    }

    let avg_price = quote_got / base_sold;
    let slippage_bps = (Decimal::ONE - avg_price / best_bid) * BPS;

    Some(SimResult {
        base_out: base_sold,
        quote_out: quote_got,
        avg_price,
        slippage_bps,
    })
}
