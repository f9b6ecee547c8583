//! Rate limiting errors

use apigate_store::StoreError;

/// Errors raised while building quotas or admitting calls
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitError {
    /// Renewal period must be positive
    #[error("rate limit window must be positive")]
    ZeroWindow,

    /// Renewal period beyond [`MAX_WINDOW`](crate::quota::MAX_WINDOW)
    #[error("rate limit window of {secs}s exceeds the {max_secs}s maximum")]
    WindowTooLong {
        /// Requested period in seconds
        secs: u64,
        /// Largest accepted period in seconds
        max_secs: u64,
    },

    /// Counter store refused the key
    #[error("counter store error: {0}")]
    Store(#[from] StoreError),
}

impl RateLimitError {
    /// Check if the failure may clear up on its own
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(StoreError::CapacityExceeded { .. }))
    }
}
