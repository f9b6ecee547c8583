//! Keyed counter store
//!
//! Holds arbitrary per-key state (`V`) with an idle expiry. Every
//! [`CounterStore::update`] is an indivisible read-modify-write for its key:
//! the DashMap shard guard is held for the duration of the closure and
//! released before `update` returns, so nothing is ever held across an
//! `.await`.
//!
//! Expired entries behave as absent. They are re-seeded lazily on access and
//! removed in bulk by [`CounterStore::purge_expired`].

use crate::error::StoreError;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
struct Slot<V> {
    value: V,
    expires_at: Instant,
}

/// Concurrent keyed state with per-key atomic updates
#[derive(Debug)]
pub struct CounterStore<V> {
    entries: DashMap<String, Slot<V>>,
    capacity: Option<usize>,
}

impl<V> CounterStore<V> {
    /// Create an unbounded store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            capacity: None,
        }
    }

    /// Create a store that refuses new keys beyond `capacity`
    #[inline]
    #[must_use]
    pub fn with_capacity_limit(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity: Some(capacity),
        }
    }

    /// Atomically update the state stored under `key`.
    ///
    /// A missing or expired entry is seeded with `init()` first. The entry's
    /// expiry is pushed to `now + ttl` on every call.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CapacityExceeded`] when `key` is new and the
    /// store is at its key ceiling even after purging expired entries.
    pub fn update<R>(
        &self,
        key: &str,
        ttl: Duration,
        now: Instant,
        init: impl FnOnce() -> V,
        f: impl FnOnce(&mut V) -> R,
    ) -> Result<R, StoreError> {
        self.ensure_room(key, now)?;

        let mut slot = match self.entries.entry(key.to_owned()) {
            Entry::Occupied(occupied) => {
                let mut slot = occupied.into_ref();
                if slot.expires_at <= now {
                    slot.value = init();
                }
                slot
            }
            Entry::Vacant(vacant) => vacant.insert(Slot {
                value: init(),
                expires_at: now + ttl,
            }),
        };
        slot.expires_at = now + ttl;
        Ok(f(&mut slot.value))
    }

    /// Read a live entry without touching its expiry
    pub fn peek<R>(&self, key: &str, now: Instant, f: impl FnOnce(&V) -> R) -> Option<R> {
        self.entries
            .get(key)
            .filter(|slot| slot.expires_at > now)
            .map(|slot| f(&slot.value))
    }

    /// Remove an entry, returning whether it existed
    #[inline]
    pub fn remove(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Drop every entry whose expiry has passed, returning how many went
    pub fn purge_expired(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, slot| slot.expires_at > now);
        let purged = before.saturating_sub(self.entries.len());
        if purged > 0 {
            tracing::debug!(purged, "purged expired counters");
        }
        purged
    }

    /// Number of tracked keys, expired ones included
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store tracks no keys
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // Runs before taking the entry guard: `len()` visits every shard.
    fn ensure_room(&self, key: &str, now: Instant) -> Result<(), StoreError> {
        let Some(capacity) = self.capacity else {
            return Ok(());
        };
        if self.entries.len() < capacity || self.entries.contains_key(key) {
            return Ok(());
        }
        self.purge_expired(now);
        if self.entries.len() < capacity {
            Ok(())
        } else {
            tracing::warn!(capacity, key, "counter store at capacity");
            Err(StoreError::capacity_exceeded(capacity, key))
        }
    }
}

impl<V> Default for CounterStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const TTL: Duration = Duration::from_secs(30);

    fn incr(store: &CounterStore<u64>, key: &str, now: Instant) -> u64 {
        store
            .update(key, TTL, now, || 0, |count| {
                *count += 1;
                *count
            })
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn update_seeds_then_accumulates() {
        let store = CounterStore::new();
        let now = Instant::now();

        assert_eq!(incr(&store, "a", now), 1);
        assert_eq!(incr(&store, "a", now), 2);
        assert_eq!(incr(&store, "b", now), 1);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_is_reseeded() {
        let store = CounterStore::new();
        incr(&store, "a", Instant::now());
        incr(&store, "a", Instant::now());

        tokio::time::advance(TTL + Duration::from_millis(1)).await;

        assert_eq!(store.peek("a", Instant::now(), |v| *v), None);
        assert_eq!(incr(&store, "a", Instant::now()), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn access_extends_expiry() {
        let store = CounterStore::new();
        incr(&store, "a", Instant::now());

        tokio::time::advance(TTL / 2).await;
        incr(&store, "a", Instant::now());
        tokio::time::advance(TTL / 2 + Duration::from_secs(1)).await;

        assert_eq!(store.peek("a", Instant::now(), |v| *v), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn purge_drops_only_expired() {
        let store = CounterStore::new();
        incr(&store, "old", Instant::now());
        tokio::time::advance(TTL).await;
        incr(&store, "fresh", Instant::now());

        assert_eq!(store.purge_expired(Instant::now()), 1);
        assert_eq!(store.len(), 1);
        assert!(store.peek("fresh", Instant::now(), |_| ()).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn capacity_limit_refuses_new_keys() {
        let store = CounterStore::with_capacity_limit(1);
        incr(&store, "a", Instant::now());

        let err = store
            .update("b", TTL, Instant::now(), || 0, |_| ())
            .unwrap_err();
        assert!(matches!(err, StoreError::CapacityExceeded { capacity: 1, .. }));

        // existing keys keep working
        assert_eq!(incr(&store, "a", Instant::now()), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn capacity_frees_up_after_expiry() {
        let store = CounterStore::with_capacity_limit(1);
        incr(&store, "a", Instant::now());
        tokio::time::advance(TTL + Duration::from_secs(1)).await;

        assert_eq!(incr(&store, "b", Instant::now()), 1);
        assert!(!store.remove("a"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_updates_are_not_lost() {
        let store = Arc::new(CounterStore::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                for _ in 0..250 {
                    incr(&store, "shared", Instant::now());
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.peek("shared", Instant::now(), |v| *v), Some(2000));
    }
}
