//! Sliding-window "why did we skip" counters for diagnostics.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub struct SkipStats {
    window: Duration,
    inner: Mutex<Inner>,
}

struct Inner {
    counts: HashMap<&'static str, u64>,
    last_flush: Instant,
}

impl SkipStats {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            inner: Mutex::new(Inner {
                counts: HashMap::new(),
                last_flush: Instant::now(),
            }),
        }
    }

    pub fn inc(&self, key: &'static str) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        *inner.counts.entry(key).or_insert(0) += 1;
    }

    /// Drains the counters at most once per window; `None` in between.
    pub fn flush_if_due(&self) -> Option<HashMap<&'static str, u64>> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.last_flush.elapsed() < self.window {
            return None;
        }
        inner.last_flush = Instant::now();
        Some(std::mem::take(&mut inner.counts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_until_window_elapses() {
        let stats = SkipStats::new(Duration::from_secs(30));
        stats.inc("skip_no_ob");
        stats.inc("skip_no_ob");
        stats.inc("skip_spread");
        assert!(stats.flush_if_due().is_none());
    }

    #[test]
    fn flush_drains_and_resets() {
        let stats = SkipStats::new(Duration::from_millis(0));
        stats.inc("a");
        let drained = stats.flush_if_due().unwrap();
        assert_eq!(drained["a"], 1);
        // Window restarts; nothing to drain until it elapses again.
        // (Zero window means it is immediately due again.)
        assert!(stats.flush_if_due().unwrap().is_empty());
    }
}
