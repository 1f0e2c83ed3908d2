//! Time source for every time-driven state machine in the node.
//!
//! Production code runs on [`SystemClock`]. Tests drive [`ManualClock`], whose
//! `sleep` advances virtual time instead of blocking.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::lock_unpoisoned;

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    elapsed: Mutex<Duration>,
    slept: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
            slept: Mutex::new(Vec::new()),
        }
    }

    pub fn advance(&self, duration: Duration) {
        *lock_unpoisoned(&self.elapsed) += duration;
    }

    pub fn advance_secs_f32(&self, secs: f32) {
        self.advance(Duration::from_secs_f32(secs));
    }

    pub fn elapsed(&self) -> Duration {
        *lock_unpoisoned(&self.elapsed)
    }

    /// Every duration passed to `sleep`, in call order.
    pub fn sleeps(&self) -> Vec<Duration> {
        lock_unpoisoned(&self.slept).clone()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        lock_unpoisoned(&self.slept).push(duration);
        self.advance(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_sleep_advances_time() {
        let clock = ManualClock::new();
        let start = clock.now();
        clock.sleep(Duration::from_millis(250));
        clock.advance_secs_f32(1.0);
        assert_eq!(clock.now() - start, Duration::from_millis(1250));
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(250)]);
    }
}
