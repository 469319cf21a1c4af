//! Bybit spot market data: WS protocol, client, sharded cluster.

pub mod cluster;
pub mod messages;
pub mod ws;

pub use cluster::BybitWsCluster;
pub use messages::{BookKind, BookMessage};
pub use ws::{BookSink, BybitWs, BybitWsConfig};
