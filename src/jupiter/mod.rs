//! Jupiter DEX aggregator integration: quote client, pacing, negative cache.

pub mod cache;
pub mod client;
pub mod rate_limit;
pub mod throttle;
pub mod types;

pub use client::{JupiterClient, JupiterClientConfig};
pub use types::{
    JupQuote, SkipEvent, ERR_AMOUNT_TOO_BIG, ERR_NO_ROUTE, ERR_TOKEN_NOT_TRADABLE,
};
