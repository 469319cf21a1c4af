//! Market data: order books, shared state, fill simulation.

pub mod calc;
pub mod orderbook;
pub mod state;
pub mod vwap;

pub use orderbook::OrderBook;
pub use state::{MarketState, QuotePair};
pub use vwap::{simulate_buy_with_notional, simulate_sell_base, SimResult};
