//! Signal dedup: suppress re-sends of the same key unless enough time
//! has passed or profit improved enough.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use rust_decimal::Decimal;

const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

pub struct Dedup {
    cooldown: Duration,
    min_delta_profit: Decimal,
    last_sent: HashMap<String, (Instant, Decimal)>,
    last_prune: Instant,
}

impl Dedup {
    pub fn new(cooldown_sec: u64, min_delta_profit: Decimal) -> Self {
        Self {
            cooldown: Duration::from_secs(cooldown_sec),
            min_delta_profit,
            last_sent: HashMap::new(),
            last_prune: Instant::now(),
        }
    }

    pub fn reconfigure(&mut self, cooldown_sec: u64, min_delta_profit: Decimal) {
        self.cooldown = Duration::from_secs(cooldown_sec);
        self.min_delta_profit = min_delta_profit;
    }

    pub fn can_send(&mut self, key: &str, profit: Decimal) -> bool {
        self.prune_stale();
        match self.last_sent.get(key) {
            None => true,
            Some((last_ts, last_profit)) => {
                last_ts.elapsed() >= self.cooldown || (profit - last_profit) >= self.min_delta_profit
            }
        }
    }

    pub fn mark_sent(&mut self, key: &str, profit: Decimal) {
        self.last_sent.insert(key.to_string(), (Instant::now(), profit));
    }

    /// Entries older than twice the cooldown can never suppress again.
    fn prune_stale(&mut self) {
        if self.last_prune.elapsed() < PRUNE_INTERVAL {
            return;
        }
        self.last_prune = Instant::now();
        let cutoff = self.cooldown * 2;
        self.last_sent.retain(|_, (ts, _)| ts.elapsed() < cutoff);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.last_sent.len()
    }
}
