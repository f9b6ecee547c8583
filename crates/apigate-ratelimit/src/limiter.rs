//! Admission decisions

use crate::backend::{CounterBackend, InMemoryCounters};
use crate::error::RateLimitError;
use crate::key::CounterKey;
use crate::quota::Quota;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Outcome of one admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Call admitted and counted
    Allowed {
        /// Configured limit
        limit: u64,
        /// Calls left in the current window
        remaining: u64,
    },
    /// Call refused; nothing was counted
    Rejected {
        /// Configured limit
        limit: u64,
        /// Time until a call could be admitted
        retry_after: Duration,
    },
}

impl Decision {
    /// Whether the call was admitted
    #[inline]
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }

    /// Configured limit behind the decision
    #[inline]
    #[must_use]
    pub fn limit(&self) -> u64 {
        match self {
            Self::Allowed { limit, .. } | Self::Rejected { limit, .. } => *limit,
        }
    }

    /// Calls left, zero when rejected
    #[inline]
    #[must_use]
    pub fn remaining(&self) -> u64 {
        match self {
            Self::Allowed { remaining, .. } => *remaining,
            Self::Rejected { .. } => 0,
        }
    }

    /// Retry delay, present only on rejection
    #[inline]
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Allowed { .. } => None,
            Self::Rejected { retry_after, .. } => Some(*retry_after),
        }
    }
}

/// Rate limiter over an injected counter backend
#[derive(Debug, Clone)]
pub struct RateLimiter {
    backend: Arc<dyn CounterBackend>,
}

impl RateLimiter {
    /// Create limiter over `backend`
    #[inline]
    #[must_use]
    pub fn new(backend: Arc<dyn CounterBackend>) -> Self {
        Self { backend }
    }

    /// Create limiter with process-local counters
    #[inline]
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryCounters::new()))
    }

    /// Admit one call against `key`, counting it only when admitted.
    ///
    /// # Errors
    ///
    /// Propagates backend failures such as a full counter store.
    pub async fn check_and_increment(
        &self,
        key: &CounterKey,
        quota: &Quota,
    ) -> Result<Decision, RateLimitError> {
        if quota.is_closed() {
            tracing::warn!(key = %key, "quota closed, rejecting");
            return Ok(Decision::Rejected {
                limit: 0,
                retry_after: quota.window(),
            });
        }

        let decision = self.backend.admit(key, quota, Instant::now()).await?;
        match decision {
            Decision::Allowed { remaining, .. } => {
                tracing::debug!(key = %key, remaining, "call admitted");
            }
            Decision::Rejected { retry_after, .. } => {
                tracing::warn!(
                    key = %key,
                    limit = quota.limit(),
                    retry_after_ms = u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX),
                    "rate limit exceeded"
                );
            }
        }
        Ok(decision)
    }

    /// Drop idle counters
    #[inline]
    pub fn purge_expired(&self) -> usize {
        self.backend.purge_expired(Instant::now())
    }

    /// Underlying backend
    #[inline]
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn CounterBackend> {
        &self.backend
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::in_memory()
    }
}
