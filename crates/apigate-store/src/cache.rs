//! Concurrent TTL cache using moka
//!
//! A thin typed wrapper over `moka::future::Cache`:
//! - bounded capacity with LRU-style eviction
//! - optional time-to-live ceiling for every entry
//! - single-flight population via [`TtlCache::try_get_with`]: concurrent
//!   misses for one key run the loader once and share its result
//!
//! Callers that need per-entry deadlines (tokens refresh at a fraction of
//! their own lifetime) store the deadline in the value and check it on read.

use moka::future::Cache;
use moka::ops::compute::{CompResult, Op};
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

/// Keyed value cache with optional TTL
#[derive(Debug, Clone)]
pub struct TtlCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    inner: Cache<K, V>,
}

impl<K, V> TtlCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create new cache with max capacity
    #[inline]
    #[must_use]
    pub fn new(max_capacity: u64) -> Self {
        Self {
            inner: Cache::new(max_capacity),
        }
    }

    /// Create cache with time-based expiration
    #[inline]
    #[must_use]
    pub fn with_ttl(max_capacity: u64, ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Insert value
    #[inline]
    pub async fn insert(&self, key: K, value: V) {
        self.inner.insert(key, value).await;
    }

    /// Get value
    #[inline]
    pub async fn get(&self, key: &K) -> Option<V> {
        self.inner.get(key).await
    }

    /// Get the cached value or run `loader` to populate it.
    ///
    /// Concurrent callers for the same key wait on a single `loader` run. A
    /// failed load caches nothing and every waiter sees the same error.
    ///
    /// # Errors
    ///
    /// Returns the loader's error, shared behind an `Arc`.
    pub async fn try_get_with<E, F>(&self, key: K, loader: F) -> Result<V, Arc<E>>
    where
        E: Send + Sync + 'static,
        F: Future<Output = Result<V, E>>,
    {
        self.inner.try_get_with(key, loader).await
    }

    /// Invalidate a single entry
    #[inline]
    pub async fn invalidate(&self, key: &K) {
        self.inner.invalidate(key).await;
    }

    /// Remove the entry under `key` only if `predicate` holds for it.
    ///
    /// Check and removal are one atomic step. Returns whether an entry was
    /// removed.
    pub async fn remove_if<P>(&self, key: K, predicate: P) -> bool
    where
        K: Clone,
        P: FnOnce(&V) -> bool,
    {
        let result = self
            .inner
            .entry(key)
            .and_compute_with(|entry| {
                let op = match entry {
                    Some(entry) if predicate(entry.value()) => Op::Remove,
                    _ => Op::Nop,
                };
                std::future::ready(op)
            })
            .await;
        matches!(result, CompResult::Removed(_))
    }
}

impl<K, V> Default for TtlCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create cache with default capacity (10,000 entries)
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn insert_and_get() {
        let cache: TtlCache<String, u32> = TtlCache::new(100);
        cache.insert("a".to_string(), 7).await;

        assert_eq!(cache.get(&"a".to_string()).await, Some(7));
        assert_eq!(cache.get(&"missing".to_string()).await, None);
    }

    #[tokio::test]
    async fn invalidation() {
        let cache: TtlCache<String, u32> = TtlCache::default();
        cache.insert("a".to_string(), 1).await;
        assert_eq!(cache.get(&"a".to_string()).await, Some(1));

        cache.invalidate(&"a".to_string()).await;
        assert_eq!(cache.get(&"a".to_string()).await, None);
    }

    #[tokio::test]
    async fn remove_if_spares_replaced_values() {
        let cache: TtlCache<String, u32> = TtlCache::default();
        cache.insert("a".to_string(), 2).await;

        assert!(!cache.remove_if("a".to_string(), |v| *v == 1).await);
        assert_eq!(cache.get(&"a".to_string()).await, Some(2));

        assert!(cache.remove_if("a".to_string(), |v| *v == 2).await);
        assert_eq!(cache.get(&"a".to_string()).await, None);
        assert!(!cache.remove_if("a".to_string(), |_| true).await);
    }

    #[tokio::test]
    async fn try_get_with_populates_once() {
        let cache: TtlCache<&'static str, String> = TtlCache::new(100);
        let loads = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let loads = Arc::clone(&loads);
            let value = cache
                .try_get_with("k", async move {
                    loads.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, std::io::Error>("loaded".to_string())
                })
                .await
                .unwrap();
            assert_eq!(value, "loaded");
        }

        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_load_is_not_cached() {
        let cache: TtlCache<&'static str, u32> = TtlCache::new(100);

        let err = cache
            .try_get_with("k", async { Err::<u32, _>("boom") })
            .await
            .unwrap_err();
        assert_eq!(*err, "boom");
        assert_eq!(cache.get(&"k").await, None);

        let ok = cache
            .try_get_with("k", async { Ok::<_, &str>(5) })
            .await
            .unwrap();
        assert_eq!(ok, 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_misses_coalesce() {
        let cache: Arc<TtlCache<&'static str, u32>> = Arc::new(TtlCache::new(100));
        let loads = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = Arc::clone(&cache);
            let loads = Arc::clone(&loads);
            handles.push(tokio::spawn(async move {
                cache
                    .try_get_with("shared", async move {
                        loads.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok::<_, std::io::Error>(42)
                    })
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), 42);
        }

        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn ttl_cache_serves_fresh_entries() {
        let cache: TtlCache<u32, u32> = TtlCache::with_ttl(100, Duration::from_secs(60));
        cache.insert(1, 2).await;
        assert_eq!(cache.get(&1).await, Some(2));
    }
}
