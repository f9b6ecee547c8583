//! Retry schedule for token requests

use rand::Rng;
use std::time::Duration;

/// Exponential backoff for transient token endpoint failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    jitter: bool,
}

impl RetryPolicy {
    /// Create policy
    #[inline]
    #[must_use]
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            jitter: true,
        }
    }

    /// Policy that never retries
    #[inline]
    #[must_use]
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// With max retries
    #[inline]
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Without random jitter
    #[inline]
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Retries after the first attempt
    #[inline]
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before retry number `retry` (0-based): `base * 2^retry`, plus
    /// up to 10% jitter
    #[must_use]
    pub fn delay(&self, retry: u32) -> Duration {
        let delay = self.base_delay.saturating_mul(2u32.saturating_pow(retry));
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let spread = u64::try_from(delay.as_millis() / 10).unwrap_or(u64::MAX);
        delay + Duration::from_millis(rand::rng().random_range(0..=spread))
    }
}

impl Default for RetryPolicy {
    /// Two retries starting at 200ms
    fn default() -> Self {
        Self::new(2, Duration::from_millis(200))
    }
}
