use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Keys are pruned of expired entries once the map grows past this.
const PRUNE_THRESHOLD: usize = 256;

/// Minimum spacing between accepted invocations of one command by one caller.
///
/// Owned by the remote loop; never shared across threads.
#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    last_accepted: HashMap<(i64, String), Instant>,
}

impl RateLimiter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_accepted: HashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn set_window(&mut self, window: Duration) {
        self.window = window;
    }

    pub fn len(&self) -> usize {
        self.last_accepted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_accepted.is_empty()
    }

    /// Accepts iff `now - last_accepted >= window`; acceptance records `now`.
    pub fn check(&mut self, caller: i64, command: &str, now: Instant) -> bool {
        let key = (caller, command.to_string());
        if let Some(last) = self.last_accepted.get(&key) {
            if now.saturating_duration_since(*last) < self.window {
                return false;
            }
        }
        self.last_accepted.insert(key, now);

        if self.last_accepted.len() > PRUNE_THRESHOLD {
            self.prune(now);
        }
        true
    }

    fn prune(&mut self, now: Instant) {
        let window = self.window;
        let before = self.last_accepted.len();
        self.last_accepted
            .retain(|_, last| now.saturating_duration_since(*last) < window);
        debug!("Rate limiter pruned {} expired keys", before - self.last_accepted.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};

    #[test]
    fn test_window_accept_reject_accept() {
        let clock = ManualClock::new();
        let mut limiter = RateLimiter::new(Duration::from_secs_f32(2.0));

        assert!(limiter.check(1, "scan", clock.now()));
        clock.advance_secs_f32(1.0);
        assert!(!limiter.check(1, "scan", clock.now()));
        clock.advance_secs_f32(1.1);
        assert!(limiter.check(1, "scan", clock.now()));
    }

    #[test]
    fn test_keys_are_independent() {
        let clock = ManualClock::new();
        let mut limiter = RateLimiter::new(Duration::from_secs(2));
        assert!(limiter.check(1, "scan", clock.now()));
        assert!(limiter.check(2, "scan", clock.now()));
        assert!(limiter.check(1, "status", clock.now()));
        assert!(!limiter.check(1, "scan", clock.now()));
    }

    #[test]
    fn test_rejection_does_not_extend_window() {
        let clock = ManualClock::new();
        let mut limiter = RateLimiter::new(Duration::from_secs(2));
        assert!(limiter.check(1, "scan", clock.now()));
        clock.advance(Duration::from_millis(1500));
        assert!(!limiter.check(1, "scan", clock.now()));
        clock.advance(Duration::from_millis(500));
        assert!(limiter.check(1, "scan", clock.now()));
    }

    #[test]
    fn test_expired_keys_pruned_past_threshold() {
        let clock = ManualClock::new();
        let mut limiter = RateLimiter::new(Duration::from_secs(2));
        for caller in 0..PRUNE_THRESHOLD as i64 {
            limiter.check(caller, "status", clock.now());
        }
        assert_eq!(limiter.len(), PRUNE_THRESHOLD);

        clock.advance(Duration::from_secs(3));
        assert!(limiter.check(-1, "status", clock.now()));
        assert_eq!(limiter.len(), 1);
    }
}
