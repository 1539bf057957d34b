//! Reconnect policy
//!
//! Constant delay between attempts, bounded by a per-lifecycle ceiling.
//! The counter is reset by a successful open or a caller-initiated connect.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Delay before every attempt
    interval: Duration,
    /// Attempts allowed before giving up
    max_attempts: u32,
    /// Attempts scheduled since the last reset
    used: u32,
}

impl ReconnectPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
            used: 0,
        }
    }

    /// Claim the next attempt.
    ///
    /// Returns the attempt number (1-based) and its delay, or `None` once the
    /// ceiling is reached.
    pub fn next_attempt(&mut self) -> Option<(u32, Duration)> {
        if self.used >= self.max_attempts {
            return None;
        }
        self.used += 1;
        Some((self.used, self.interval))
    }

    /// Reset after a successful open
    #[inline]
    pub fn reset(&mut self) {
        self.used = 0;
    }

    #[inline]
    pub fn used(&self) -> u32 {
        self.used
    }

    #[inline]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}
