//! Bounded reconnection policy.

use std::time::Duration;

/// Fixed-interval retry budget for one logical session.
///
/// Reset whenever a handshake succeeds or the caller explicitly connects.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    max_attempts: u32,
    interval: Duration,
    attempts: u32,
}

impl ReconnectPolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
            attempts: 0,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Count one more attempt, returning its 1-based number, or `None` once
    /// the budget is spent.
    pub fn try_next_attempt(&mut self) -> Option<u32> {
        if self.is_exhausted() {
            return None;
        }
        self.attempts += 1;
        Some(self.attempts)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(
            convo_core::constants::DEFAULT_MAX_CONNECTION_ATTEMPTS,
            Duration::from_secs(convo_core::constants::DEFAULT_RETRY_INTERVAL_SECS),
        )
    }
}
