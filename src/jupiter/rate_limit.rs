//! Client-side request pacing: GCRA rate limit plus a concurrency cap.
//!
//! Both gates are taken before every request and released when the permit
//! drops, including on error paths.

use std::num::NonZeroU32;

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use tokio::sync::{Semaphore, SemaphorePermit};

pub struct RequestGate {
    limiter: Option<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    sem: Semaphore,
}

impl RequestGate {
    /// `rps == 0` disables the rate limit; the concurrency cap still applies.
    pub fn new(rps: u32, concurrency: usize) -> Self {
        let limiter = NonZeroU32::new(rps)
            .map(|rps| RateLimiter::direct(Quota::per_second(rps)));
        Self {
            limiter,
            sem: Semaphore::new(concurrency.max(1)),
        }
    }

    /// Waits for a concurrency slot, then for the rate limiter.
    pub async fn acquire(&self) -> SemaphorePermit<'_> {
        // The semaphore is never closed, so acquire cannot fail.
        let permit = match self.sem.acquire().await {
            Ok(p) => p,
            Err(_) => unreachable!("request gate semaphore closed"),
        };
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
        permit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn concurrency_cap_serializes_excess_requests() {
        let gate = RequestGate::new(0, 1);
        let p1 = gate.acquire().await;
        // Second acquire must wait until the first permit drops.
        let waited = tokio::time::timeout(std::time::Duration::from_millis(50), gate.acquire());
        assert!(waited.await.is_err());
        drop(p1);
        let _p2 = gate.acquire().await;
    }

    #[tokio::test]
    async fn rate_limit_paces_requests() {
        let gate = RequestGate::new(10, 4);
        let start = Instant::now();
        for _ in 0..3 {
            let _p = gate.acquire().await;
        }
        // 10 rps: the burst allowance covers the first call, the rest pace
        // out at >= 100ms apart in the worst case; just assert no hang.
        assert!(start.elapsed().as_secs() < 2);
    }

    #[tokio::test]
    async fn zero_rps_means_unlimited() {
        let gate = RequestGate::new(0, 8);
        for _ in 0..100 {
            let _p = gate.acquire().await;
        }
    }
}
