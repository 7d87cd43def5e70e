//! Per-user sliding-window bet rate limiting

use super::types::UserId;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::debug;

/// Admits at most `max_bets` attempts per user within any rolling `window`
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    max_bets: u32,
    window: Duration,
    attempts: DashMap<UserId, VecDeque<Instant>>,
}

impl SlidingWindowLimiter {
    pub fn new(max_bets: u32, window: Duration) -> Self {
        Self {
            max_bets,
            window,
            attempts: DashMap::new(),
        }
    }

    pub fn max_bets(&self) -> u32 {
        self.max_bets
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Records an attempt at `now` if the user is under the limit
    pub fn try_acquire(&self, user_id: &str, now: Instant) -> bool {
        let mut entry = self.attempts.entry(user_id.to_string()).or_default();
        let window = &mut *entry;
        while let Some(oldest) = window.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                window.pop_front();
            } else {
                break;
            }
        }
        if window.len() >= self.max_bets as usize {
            debug!("Rate limit hit for {} ({} in window)", user_id, window.len());
            return false;
        }
        window.push_back(now);
        true
    }

    /// Drops users whose whole window has expired
    pub fn prune(&self, now: Instant) {
        self.attempts.retain(|_, window| {
            window
                .back()
                .map(|last| now.saturating_duration_since(*last) < self.window)
                .unwrap_or(false)
        });
    }

    pub fn tracked_users(&self) -> usize {
        self.attempts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_within_window() {
        let limiter = SlidingWindowLimiter::new(3, Duration::from_secs(60));
        let now = Instant::now();
        assert!(limiter.try_acquire("alice", now));
        assert!(limiter.try_acquire("alice", now + Duration::from_secs(1)));
        assert!(limiter.try_acquire("alice", now + Duration::from_secs(2)));
        assert!(!limiter.try_acquire("alice", now + Duration::from_secs(3)));
        assert!(limiter.try_acquire("bob", now + Duration::from_secs(3)));
    }

    #[test]
    fn test_window_slides() {
        let limiter = SlidingWindowLimiter::new(2, Duration::from_secs(10));
        let now = Instant::now();
        assert!(limiter.try_acquire("alice", now));
        assert!(limiter.try_acquire("alice", now + Duration::from_secs(5)));
        assert!(!limiter.try_acquire("alice", now + Duration::from_secs(9)));
        assert!(limiter.try_acquire("alice", now + Duration::from_secs(10)));
        assert!(!limiter.try_acquire("alice", now + Duration::from_secs(11)));
    }

    #[test]
    fn test_prune_forgets_idle_users() {
        let limiter = SlidingWindowLimiter::new(2, Duration::from_secs(10));
        let now = Instant::now();
        limiter.try_acquire("alice", now);
        limiter.try_acquire("bob", now + Duration::from_secs(8));
        limiter.prune(now + Duration::from_secs(12));
        assert_eq!(limiter.tracked_users(), 1);
    }
}
