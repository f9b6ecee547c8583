//! Quota definitions

use crate::error::RateLimitError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Longest accepted renewal period
pub const MAX_WINDOW: Duration = Duration::from_secs(366 * 24 * 60 * 60);

/// Counting algorithm behind a quota
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Algorithm {
    /// Count resets when the renewal period elapses
    #[default]
    FixedWindow,
    /// Weighted estimate over the current and previous window
    SlidingWindow,
    /// Capacity `limit`, refilled at `limit / window`
    TokenBucket,
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::FixedWindow => "fixed-window",
            Self::SlidingWindow => "sliding-window",
            Self::TokenBucket => "token-bucket",
        };
        f.write_str(name)
    }
}

/// Calls allowed per renewal window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Quota {
    limit: u64,
    window: Duration,
    algorithm: Algorithm,
}

impl Quota {
    /// Create a quota. A zero or negative `limit` produces a quota that
    /// rejects every call.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitError::ZeroWindow`] for an empty renewal period
    /// and [`RateLimitError::WindowTooLong`] beyond [`MAX_WINDOW`].
    pub fn new(limit: i64, window: Duration, algorithm: Algorithm) -> Result<Self, RateLimitError> {
        if window.is_zero() {
            return Err(RateLimitError::ZeroWindow);
        }
        if window > MAX_WINDOW {
            return Err(RateLimitError::WindowTooLong {
                secs: window.as_secs(),
                max_secs: MAX_WINDOW.as_secs(),
            });
        }
        Ok(Self {
            limit: u64::try_from(limit).unwrap_or(0),
            window,
            algorithm,
        })
    }

    /// Fixed-window quota
    ///
    /// # Errors
    ///
    /// See [`Quota::new`].
    #[inline]
    pub fn fixed_window(limit: i64, window: Duration) -> Result<Self, RateLimitError> {
        Self::new(limit, window, Algorithm::FixedWindow)
    }

    /// Calls allowed per window
    #[inline]
    #[must_use]
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Renewal period
    #[inline]
    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Counting algorithm
    #[inline]
    #[must_use]
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Whether this quota can never admit a call
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.limit == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_limit_closes_quota() {
        let quota = Quota::fixed_window(-5, Duration::from_secs(1)).unwrap();
        assert_eq!(quota.limit(), 0);
        assert!(quota.is_closed());
    }

    #[test]
    fn zero_window_rejected() {
        assert_eq!(
            Quota::fixed_window(5, Duration::ZERO),
            Err(RateLimitError::ZeroWindow)
        );
    }

    #[test]
    fn oversized_window_rejected() {
        assert_eq!(
            Quota::fixed_window(10, Duration::from_secs(u64::MAX)),
            Err(RateLimitError::WindowTooLong {
                secs: u64::MAX,
                max_secs: MAX_WINDOW.as_secs(),
            })
        );
        assert!(Quota::fixed_window(10, MAX_WINDOW).is_ok());
    }

    #[test]
    fn algorithm_names() {
        let parsed: Algorithm = serde_json::from_str("\"token-bucket\"").unwrap();
        assert_eq!(parsed, Algorithm::TokenBucket);
        assert_eq!(Algorithm::default().to_string(), "fixed-window");
    }
}
