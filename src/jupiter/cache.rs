//! Negative cache for quote refusals.
//!
//! Two tables: mint -> deadline and (input, output) pair -> deadline.
//! A blocked entry short-circuits the request entirely. Deadlines only
//! ever move forward; re-blocking with a shorter TTL never shrinks one.

use std::time::{Duration, Instant};

use dashmap::DashMap;

const PRUNE_PROBABILITY: f64 = 0.02;
const MAX_ENTRIES_PER_TABLE: usize = 10_000;

#[derive(Default)]
pub struct NegativeCache {
    mints: DashMap<String, Instant>,
    pairs: DashMap<(String, String), Instant>,
}

impl NegativeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block_mint(&self, mint: &str, ttl: Duration) {
        let deadline = Instant::now() + ttl;
        self.mints
            .entry(mint.to_string())
            .and_modify(|d| *d = (*d).max(deadline))
            .or_insert(deadline);
    }

    pub fn block_pair(&self, input_mint: &str, output_mint: &str, ttl: Duration) {
        let deadline = Instant::now() + ttl;
        self.pairs
            .entry((input_mint.to_string(), output_mint.to_string()))
            .and_modify(|d| *d = (*d).max(deadline))
            .or_insert(deadline);
    }

    pub fn is_blocked(&self, input_mint: &str, output_mint: &str) -> bool {
        let now = Instant::now();
        let mint_hit = |m: &str| self.mints.get(m).map_or(false, |d| *d > now);
        if mint_hit(input_mint) || mint_hit(output_mint) {
            return true;
        }
        self.pairs
            .get(&(input_mint.to_string(), output_mint.to_string()))
            .map_or(false, |d| *d > now)
    }

    /// Called on the hot path; actually prunes on ~2% of calls.
    pub fn maybe_prune(&self) {
        if rand::random::<f64>() >= PRUNE_PROBABILITY {
            return;
        }
        self.prune_now();
    }

    fn prune_now(&self) {
        let now = Instant::now();
        self.mints.retain(|_, d| *d > now);
        self.pairs.retain(|_, d| *d > now);

        // Hard cap: drop the earliest deadlines first.
        if self.mints.len() > MAX_ENTRIES_PER_TABLE {
            let mut entries: Vec<(String, Instant)> = self
                .mints
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect();
            entries.sort_by_key(|(_, d)| *d);
            for (key, _) in entries.iter().take(entries.len() - MAX_ENTRIES_PER_TABLE) {
                self.mints.remove(key);
            }
        }
        if self.pairs.len() > MAX_ENTRIES_PER_TABLE {
            let mut entries: Vec<((String, String), Instant)> = self
                .pairs
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect();
            entries.sort_by_key(|(_, d)| *d);
            for (key, _) in entries.iter().take(entries.len() - MAX_ENTRIES_PER_TABLE) {
                self.pairs.remove(key);
            }
        }
    }
}
