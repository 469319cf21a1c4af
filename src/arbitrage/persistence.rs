//! Consecutive-hit gate: an opportunity must stay valid for N ticks in
//! a row before it may emit. Any invalid tick resets the streak.

use std::collections::HashMap;

pub struct Persistence {
    hits: u32,
    counts: HashMap<String, u32>,
}

impl Persistence {
    pub fn new(hits: u32) -> Self {
        Self {
            hits: hits.max(1),
            counts: HashMap::new(),
        }
    }

    pub fn reconfigure(&mut self, hits: u32) {
        self.hits = hits.max(1);
    }

    /// Record one evaluation; returns true when the streak reached the
    /// threshold.
    pub fn hit(&mut self, key: &str, ok: bool) -> bool {
        if !ok {
            self.counts.insert(key.to_string(), 0);
            return false;
        }
        let count = self.counts.entry(key.to_string()).or_insert(0);
        *count += 1;
        *count >= self.hits
    }

    pub fn reset(&mut self, key: &str) {
        self.counts.insert(key.to_string(), 0);
    }

    /// Drop counters for keys no longer in the active set.
    pub fn retain_keys<F: Fn(&str) -> bool>(&mut self, keep: F) {
        self.counts.retain(|k, _| keep(k));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_one_fires_immediately() {
        let mut p = Persistence::new(1);
        assert!(p.hit("k", true));
    }

    #[test]
    fn requires_consecutive_hits() {
        let mut p = Persistence::new(3);
        assert!(!p.hit("k", true));
        assert!(!p.hit("k", true));
        assert!(p.hit("k", true));
        // Stays ready while the streak continues.
        assert!(p.hit("k", true));
    }

    #[test]
    fn invalid_tick_resets_streak() {
        let mut p = Persistence::new(2);
        assert!(!p.hit("k", true));
        assert!(!p.hit("k", false));
        assert!(!p.hit("k", true));
        assert!(p.hit("k", true));
    }

    #[test]
    fn zero_threshold_is_clamped_to_one() {
        let mut p = Persistence::new(0);
        assert!(p.hit("k", true));
    }
}
