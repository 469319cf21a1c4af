//! Quarantine: auto-disable failing symbols, persist, re-verify.

pub mod manager;
pub mod sanitizer;
pub mod store;
pub mod verifier;

pub use manager::{ActiveSet, QuarantineManager, Watchlist};
pub use sanitizer::{run_sanitizer, Sanitizer, SanitizerConfig};
pub use store::{
    QuarantineEntry, REASON_BAD_TOKEN_CFG, REASON_NOT_TRADABLE, REASON_NO_ROUTE, REASON_WS_STALE,
};
pub use verifier::{verify_loop, VerifierConfig};
