//! Counter state backends

use crate::error::RateLimitError;
use crate::key::CounterKey;
use crate::limiter::Decision;
use crate::quota::Quota;
use crate::window::WindowState;
use apigate_store::CounterStore;
use async_trait::async_trait;
use tokio::time::Instant;

/// Storage seam for rate-limit counters.
///
/// `admit` must be indivisible per key: two concurrent calls for one key
/// observe each other's increments.
#[async_trait]
pub trait CounterBackend: Send + Sync + std::fmt::Debug {
    /// Admit or reject one call against `key` under `quota`
    async fn admit(
        &self,
        key: &CounterKey,
        quota: &Quota,
        now: Instant,
    ) -> Result<Decision, RateLimitError>;

    /// Remove counters idle past their expiry
    fn purge_expired(&self, now: Instant) -> usize;

    /// Number of live or not-yet-purged counters
    fn len(&self) -> usize;

    /// Whether no counters are tracked
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-local counters on a [`CounterStore`]
#[derive(Debug, Default)]
pub struct InMemoryCounters {
    store: CounterStore<WindowState>,
}

impl InMemoryCounters {
    /// Create unbounded counters
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create counters that stop tracking new keys beyond `max_keys`
    #[inline]
    #[must_use]
    pub fn with_max_keys(max_keys: usize) -> Self {
        Self {
            store: CounterStore::with_capacity_limit(max_keys),
        }
    }
}

#[async_trait]
impl CounterBackend for InMemoryCounters {
    async fn admit(
        &self,
        key: &CounterKey,
        quota: &Quota,
        now: Instant,
    ) -> Result<Decision, RateLimitError> {
        // sliding windows still read the previous window
        let ttl = quota.window().saturating_mul(2);
        let decision = self.store.update(
            key.as_str(),
            ttl,
            now,
            || WindowState::seed(quota, now),
            |state| {
                if !state.matches(quota) {
                    tracing::warn!(
                        key = %key,
                        algorithm = %quota.algorithm(),
                        "counter shared by policies with different quotas, reseeding"
                    );
                    *state = WindowState::seed(quota, now);
                }
                state.admit(quota, now)
            },
        )?;
        Ok(decision)
    }

    fn purge_expired(&self, now: Instant) -> usize {
        self.store.purge_expired(now)
    }

    fn len(&self) -> usize {
        self.store.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::Algorithm;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn mismatched_bucket_is_reseeded() {
        let counters = InMemoryCounters::new();
        let key = CounterKey::per_resource("shared");
        let small = Quota::new(1, Duration::from_secs(10), Algorithm::TokenBucket).unwrap();
        let large = Quota::new(5, Duration::from_secs(10), Algorithm::TokenBucket).unwrap();

        let now = Instant::now();
        assert!(counters.admit(&key, &small, now).await.unwrap().is_allowed());
        assert!(!counters.admit(&key, &small, now).await.unwrap().is_allowed());

        let decision = counters.admit(&key, &large, now).await.unwrap();
        assert_eq!(decision, Decision::Allowed { limit: 5, remaining: 4 });
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_window_with_other_quota_is_reseeded() {
        let counters = InMemoryCounters::new();
        let key = CounterKey::per_resource("shared");
        let burst = Quota::fixed_window(10, Duration::from_secs(30)).unwrap();
        let hourly = Quota::fixed_window(1000, Duration::from_secs(3600)).unwrap();

        let now = Instant::now();
        for _ in 0..3 {
            counters.admit(&key, &burst, now).await.unwrap();
        }
        let decision = counters.admit(&key, &hourly, now).await.unwrap();
        assert_eq!(decision, Decision::Allowed { limit: 1000, remaining: 999 });
    }

    #[tokio::test(start_paused = true)]
    async fn idle_counters_are_purged() {
        let counters = InMemoryCounters::new();
        let quota = Quota::fixed_window(3, Duration::from_secs(5)).unwrap();
        counters
            .admit(&CounterKey::per_resource("r"), &quota, Instant::now())
            .await
            .unwrap();
        assert_eq!(counters.len(), 1);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(counters.purge_expired(Instant::now()), 1);
        assert!(counters.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn key_ceiling_surfaces_store_error() {
        let counters = InMemoryCounters::with_max_keys(1);
        let quota = Quota::fixed_window(3, Duration::from_secs(5)).unwrap();
        let now = Instant::now();
        counters
            .admit(&CounterKey::per_resource("a"), &quota, now)
            .await
            .unwrap();

        let err = counters
            .admit(&CounterKey::per_resource("b"), &quota, now)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
