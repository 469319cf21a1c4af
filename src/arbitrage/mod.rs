//! Arbitrage detection: engine, poller and their supporting tables.

pub mod dedup;
pub mod denylist;
pub mod engine;
pub mod persistence;
pub mod poller;
pub mod stats;

pub use dedup::Dedup;
pub use denylist::Denylist;
pub use engine::ArbEngine;
pub use persistence::Persistence;
pub use poller::QuotePoller;
pub use stats::SkipStats;
