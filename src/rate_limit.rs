//! Per-IP fixed-window rate limiter guarding the `/render` endpoint (§6).

use std::net::IpAddr;
use std::time::{Duration, Instant};

use dashmap::DashMap;

struct Window {
    count: u32,
    reset_at: Instant,
}

pub struct RateLimiter {
    windows: DashMap<IpAddr, Window>,
    limit: u32,
    period: Duration,
}

impl RateLimiter {
    #[must_use]
    pub fn new(limit: u32, period: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            limit,
            period,
        }
    }

    /// Returns `true` if the request is allowed, incrementing the window
    /// counter; `false` if the client has exceeded its window budget.
    pub fn check(&self, addr: IpAddr) -> bool {
        let now = Instant::now();
        let mut entry = self.windows.entry(addr).or_insert_with(|| Window {
            count: 0,
            reset_at: now + self.period,
        });

        if now >= entry.reset_at {
            entry.count = 0;
            entry.reset_at = now + self.period;
        }

        if entry.count >= self.limit {
            false
        } else {
            entry.count += 1;
            true
        }
    }

    /// Prunes windows that have already reset and seen no new requests;
    /// intended to run periodically alongside cache cleanup.
    pub fn prune(&self) {
        let now = Instant::now();
        self.windows.retain(|_, w| now < w.reset_at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_limit_then_blocks() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        let addr: IpAddr = "127.0.0.1".parse().unwrap();
        assert!(limiter.check(addr));
        assert!(limiter.check(addr));
        assert!(!limiter.check(addr));
    }

    #[test]
    fn separate_ips_have_separate_windows() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let a: IpAddr = "127.0.0.1".parse().unwrap();
        let b: IpAddr = "127.0.0.2".parse().unwrap();
        assert!(limiter.check(a));
        assert!(limiter.check(b));
    }
}
