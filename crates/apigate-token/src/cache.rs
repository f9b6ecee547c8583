//! Token cache
//!
//! Entries carry their own refresh instant (95% of the reported lifetime)
//! measured on the tokio clock. The moka TTL is only an outer ceiling.

use crate::error::TokenError;
use crate::response::AccessToken;
use apigate_store::TtlCache;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Percentage of `expires_in` after which a token is treated as a miss
pub const REFRESH_PERCENT: u32 = 95;

/// Longest any token is held regardless of its reported lifetime
pub const MAX_TOKEN_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

/// A bearer token with its refresh deadline
#[derive(Clone)]
pub struct CachedToken {
    access_token: Arc<str>,
    acquired_at: Instant,
    refresh_at: Instant,
    expires_in: Duration,
}

impl CachedToken {
    /// Wrap a freshly acquired token
    #[must_use]
    pub fn new(token: AccessToken, acquired_at: Instant) -> Self {
        let refresh_after = token
            .expires_in
            .checked_mul(REFRESH_PERCENT)
            .map_or(MAX_TOKEN_LIFETIME, |scaled| scaled / 100)
            .min(MAX_TOKEN_LIFETIME);
        Self {
            refresh_at: acquired_at + refresh_after,
            access_token: token.access_token.into(),
            acquired_at,
            expires_in: token.expires_in,
        }
    }

    /// Bearer string
    #[inline]
    #[must_use]
    pub fn bearer(&self) -> &str {
        &self.access_token
    }

    /// When the token was obtained
    #[inline]
    #[must_use]
    pub fn acquired_at(&self) -> Instant {
        self.acquired_at
    }

    /// When the token stops being served from cache
    #[inline]
    #[must_use]
    pub fn refresh_at(&self) -> Instant {
        self.refresh_at
    }

    /// Reported lifetime
    #[inline]
    #[must_use]
    pub fn expires_in(&self) -> Duration {
        self.expires_in
    }

    /// Whether the token may still be served at `now`
    #[inline]
    #[must_use]
    pub fn is_fresh(&self, now: Instant) -> bool {
        now < self.refresh_at
    }
}

impl fmt::Debug for CachedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedToken")
            .field("access_token", &"****")
            .field("acquired_at", &self.acquired_at)
            .field("refresh_at", &self.refresh_at)
            .finish_non_exhaustive()
    }
}

/// Tokens keyed by `credential|scope`
#[derive(Debug, Clone)]
pub struct TokenCache {
    inner: TtlCache<String, CachedToken>,
}

impl TokenCache {
    /// Create cache holding up to `max_capacity` tokens
    #[inline]
    #[must_use]
    pub fn new(max_capacity: u64) -> Self {
        Self {
            inner: TtlCache::with_ttl(max_capacity, MAX_TOKEN_LIFETIME),
        }
    }

    /// Fresh token for `key`, if any
    pub async fn get(&self, key: &str) -> Option<CachedToken> {
        self.inner
            .get(&key.to_string())
            .await
            .filter(|token| token.is_fresh(Instant::now()))
    }

    /// Cached entry for `key` even if stale
    pub async fn peek(&self, key: &str) -> Option<CachedToken> {
        self.inner.get(&key.to_string()).await
    }

    /// Store a token
    pub async fn insert(&self, key: impl Into<String>, token: CachedToken) {
        self.inner.insert(key.into(), token).await;
    }

    /// Cached token or the result of a single shared `acquire`
    ///
    /// # Errors
    ///
    /// Returns the acquisition error; nothing is cached on failure.
    pub async fn get_or_acquire<F>(&self, key: &str, acquire: F) -> Result<CachedToken, TokenError>
    where
        F: Future<Output = Result<CachedToken, TokenError>>,
    {
        self.inner
            .try_get_with(key.to_string(), acquire)
            .await
            .map_err(|err| (*err).clone())
    }

    /// Evict `key` only while it still holds `bearer`
    pub async fn invalidate_bearer(&self, key: &str, bearer: &str) -> bool {
        self.inner
            .remove_if(key.to_string(), |token| token.bearer() == bearer)
            .await
    }
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new(1_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(secs: u64) -> AccessToken {
        AccessToken {
            access_token: "tok".into(),
            expires_in: Duration::from_secs(secs),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_at_95_percent() {
        let now = Instant::now();
        let cached = CachedToken::new(token(100), now);

        assert_eq!(cached.refresh_at(), now + Duration::from_secs(95));
        assert!(cached.is_fresh(now + Duration::from_secs(94)));
        assert!(!cached.is_fresh(now + Duration::from_secs(95)));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_token_is_a_miss() {
        let cache = TokenCache::default();
        cache.insert("k", CachedToken::new(token(100), Instant::now())).await;
        assert!(cache.get("k").await.is_some());

        tokio::time::advance(Duration::from_secs(96)).await;
        assert!(cache.get("k").await.is_none());
        assert!(cache.peek("k").await.is_some());
    }

    #[tokio::test]
    async fn invalidate_bearer_checks_current_token() {
        let cache = TokenCache::default();
        cache.insert("k", CachedToken::new(token(100), Instant::now())).await;

        assert!(!cache.invalidate_bearer("k", "other").await);
        assert!(cache.peek("k").await.is_some());
        assert!(cache.invalidate_bearer("k", "tok").await);
        assert!(cache.peek("k").await.is_none());
    }
}
