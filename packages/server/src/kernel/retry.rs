//! Exponential backoff shared by the fetch retry loop and the job queue.

use std::time::Duration;

/// `base * 2^(attempt - 1)`, optionally capped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Option<Duration>,
}

impl BackoffPolicy {
    pub const fn exponential(base: Duration) -> Self {
        Self { base, max: None }
    }

    pub const fn capped(mut self, max: Duration) -> Self {
        self.max = Some(max);
        self
    }

    /// Delay to wait after the given (1-based) failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self.base.saturating_mul(1u32 << exponent);
        match self.max {
            Some(max) => delay.min(max),
            None => delay,
        }
    }
}
