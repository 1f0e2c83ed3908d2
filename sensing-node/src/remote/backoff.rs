//! Connection state machine for the remote channel.
//!
//! Connecting -> Connected on success; any failure moves to BackingOff for
//! `min(base * 2^i, cap)` and then back to Connecting. Once the failure count
//! exceeds `max_attempts` the manager is Disabled for good.

use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use watchpost_common::utils::format_duration;

use crate::settings::SettingsSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl BackoffPolicy {
    pub fn from_snapshot(snapshot: &SettingsSnapshot) -> Self {
        Self {
            base: Duration::from_secs(snapshot.backoff_base_secs),
            cap: Duration::from_secs(snapshot.backoff_cap_secs),
            max_attempts: snapshot.backoff_max_attempts,
        }
    }

    /// Delay before retry `attempt` (0-indexed). Saturates at `cap`.
    pub fn delay(&self, attempt: u32) -> Duration {
        1u32.checked_shl(attempt)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.cap, |delay| delay.min(self.cap))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    BackingOff { until: Instant },
    Disabled,
}

#[derive(Debug)]
pub struct ConnectionManager {
    policy: BackoffPolicy,
    state: ConnectionState,
    attempts: u32,
}

impl ConnectionManager {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            state: ConnectionState::Connecting,
            attempts: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_disabled(&self) -> bool {
        self.state == ConnectionState::Disabled
    }

    /// Applies to the next failure; a running backoff keeps its deadline.
    pub fn set_policy(&mut self, policy: BackoffPolicy) {
        self.policy = policy;
    }

    pub fn on_connected(&mut self) {
        if self.state == ConnectionState::Disabled {
            return;
        }
        if self.attempts > 0 {
            info!("Remote channel connected after {} failed attempts", self.attempts);
        } else {
            info!("Remote channel connected");
        }
        self.state = ConnectionState::Connected;
    }

    /// A completed poll proves the link is healthy and clears the budget.
    pub fn on_poll_ok(&mut self) {
        if self.state == ConnectionState::Connected {
            self.attempts = 0;
        }
    }

    /// Returns the chosen delay, or `None` once the manager gives up.
    pub fn on_failure(&mut self, now: Instant) -> Option<Duration> {
        if self.state == ConnectionState::Disabled {
            return None;
        }

        self.attempts += 1;
        if self.attempts > self.policy.max_attempts {
            self.state = ConnectionState::Disabled;
            error!(
                "Remote channel disabled after {} failed attempts; sensing continues without remote control",
                self.policy.max_attempts
            );
            return None;
        }

        let delay = self.policy.delay(self.attempts - 1);
        self.state = ConnectionState::BackingOff { until: now + delay };
        warn!(
            "Remote channel backing off for {} (attempt {}/{})",
            format_duration(delay),
            self.attempts,
            self.policy.max_attempts
        );
        Some(delay)
    }

    /// Moves an elapsed backoff to Connecting and returns the state.
    pub fn poll(&mut self, now: Instant) -> ConnectionState {
        if let ConnectionState::BackingOff { until } = self.state {
            if now >= until {
                self.state = ConnectionState::Connecting;
            }
        }
        self.state
    }

    /// Time left in the current backoff, zero in any other state.
    pub fn remaining(&self, now: Instant) -> Duration {
        match self.state {
            ConnectionState::BackingOff { until } => until.saturating_duration_since(now),
            _ => Duration::ZERO,
        }
    }
}
