//! Keyed log throttle.
//!
//! During an outage every token fails the same way every tick; a given
//! key is allowed through at most once per window so the log stays useful.

use std::time::{Duration, Instant};

use dashmap::DashMap;

pub struct LogThrottle {
    window: Duration,
    last: DashMap<String, Instant>,
}

impl LogThrottle {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last: DashMap::new(),
        }
    }

    /// True when the caller should emit the log line for `key` now.
    pub fn allow(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut allowed = false;
        self.last
            .entry(key.to_string())
            .and_modify(|t| {
                if now.duration_since(*t) >= self.window {
                    *t = now;
                    allowed = true;
                }
            })
            .or_insert_with(|| {
                allowed = true;
                now
            });

        // Opportunistic cleanup to keep the table bounded during storms.
        if self.last.len() > 4_096 {
            let window = self.window;
            self.last.retain(|_, t| now.duration_since(*t) < window * 2);
        }
        allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_hit_passes_repeat_is_suppressed() {
        let throttle = LogThrottle::new(Duration::from_secs(30));
        assert!(throttle.allow("k"));
        assert!(!throttle.allow("k"));
        assert!(throttle.allow("other"));
    }

    #[test]
    fn passes_again_after_window() {
        let throttle = LogThrottle::new(Duration::from_millis(5));
        assert!(throttle.allow("k"));
        std::thread::sleep(Duration::from_millis(10));
        assert!(throttle.allow("k"));
    }
}
