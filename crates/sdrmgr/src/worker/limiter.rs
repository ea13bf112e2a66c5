// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sliding-window start limiter.
//!
//! Allows at most `count` attempts in any half-open window `[t, t + period)`;
//! attempt `count + 1` is refused. A count of 0 disables the limit.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct RateLimiter {
    count: u32,
    period: Duration,
    history: VecDeque<Instant>,
}

impl RateLimiter {
    pub fn new(count: u32, period: Duration) -> Self {
        Self {
            count,
            period,
            history: VecDeque::with_capacity(count as usize),
        }
    }

    /// Unlimited.
    pub fn disabled() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn set_count(&mut self, count: u32) {
        self.count = count;
    }

    pub fn set_period(&mut self, period: Duration) {
        self.period = period;
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.history.front() {
            if now.saturating_duration_since(oldest) >= self.period {
                self.history.pop_front();
            } else {
                break;
            }
        }
    }

    /// True if an attempt now would be allowed. Does not record it.
    pub fn would_allow(&mut self, now: Instant) -> bool {
        if self.count == 0 {
            return true;
        }
        self.prune(now);
        self.history.len() < self.count as usize
    }

    /// Record an attempt if allowed.
    pub fn allow(&mut self, now: Instant) -> bool {
        if !self.would_allow(now) {
            return false;
        }
        if self.count > 0 {
            self.history.push_back(now);
        }
        true
    }

    /// When the next attempt becomes possible, if currently blocked.
    pub fn next_allowed(&mut self, now: Instant) -> Option<Instant> {
        if self.would_allow(now) {
            return None;
        }
        self.history.front().map(|&oldest| oldest + self.period)
    }

    pub fn reset(&mut self) {
        self.history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocks_after_count() {
        let t0 = Instant::now();
        let period = Duration::from_secs(10);
        let mut limiter = RateLimiter::new(3, period);

        assert!(limiter.allow(t0));
        assert!(limiter.allow(t0 + Duration::from_secs(1)));
        assert!(limiter.allow(t0 + Duration::from_secs(2)));
        assert!(!limiter.allow(t0 + Duration::from_secs(3)));
        assert_eq!(limiter.next_allowed(t0 + Duration::from_secs(3)), Some(t0 + period));

        // The first attempt leaves the window.
        assert!(limiter.allow(t0 + period));
        assert!(!limiter.allow(t0 + period));
    }

    #[test]
    fn test_exactly_count_attempts_per_window() {
        let t0 = Instant::now();
        let period = Duration::from_secs(5);
        let mut limiter = RateLimiter::new(2, period);

        assert!(limiter.allow(t0));
        assert!(limiter.allow(t0));
        assert!(!limiter.allow(t0));
        assert!(!limiter.allow(t0 + period - Duration::from_nanos(1)));

        // Both leave the window together; two more fit, a third does not.
        assert!(limiter.allow(t0 + period));
        assert!(limiter.allow(t0 + period));
        assert!(!limiter.allow(t0 + period));
    }

    #[test]
    fn test_zero_count_is_unlimited() {
        let t0 = Instant::now();
        let mut limiter = RateLimiter::disabled();
        for _ in 0..1000 {
            assert!(limiter.allow(t0));
        }
        assert_eq!(limiter.next_allowed(t0), None);
    }

    #[test]
    fn test_window_bound_holds() {
        // Attempts every 300 ms for 30 s: no window of 2 s ever sees more than 4.
        let t0 = Instant::now();
        let period = Duration::from_secs(2);
        let mut limiter = RateLimiter::new(4, period);
        let mut granted = Vec::new();
        for step in 0..100u64 {
            let now = t0 + Duration::from_millis(step * 300);
            if limiter.allow(now) {
                granted.push(now);
            }
        }
        for (i, &start) in granted.iter().enumerate() {
            let in_window = granted[i..].iter().take_while(|&&t| t - start < period).count();
            assert!(in_window <= 4, "{in_window} starts within one window");
        }
        assert!(granted.len() > 4);
    }
}
