//! Token provider
//!
//! Owns the registered [`TokenSource`]s, the [`TokenCache`] and the
//! transport. [`TokenProvider::token`] is the get-or-populate entry point
//! used by the pipeline; concurrent misses for one key share a single
//! acquisition.

use crate::cache::{CachedToken, TokenCache};
use crate::error::TokenError;
use crate::response::AccessToken;
use crate::retry::RetryPolicy;
use crate::source::TokenSource;
use crate::transport::TokenTransport;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::Instant;

/// Acquires and caches backend tokens
#[derive(Debug)]
pub struct TokenProvider {
    sources: HashMap<String, TokenSource>,
    transport: Arc<dyn TokenTransport>,
    cache: TokenCache,
    retry: RetryPolicy,
    acquisitions: AtomicU64,
}

impl TokenProvider {
    /// Create provider with no sources
    #[must_use]
    pub fn new(transport: Arc<dyn TokenTransport>) -> Self {
        Self {
            sources: HashMap::new(),
            transport,
            cache: TokenCache::default(),
            retry: RetryPolicy::default(),
            acquisitions: AtomicU64::new(0),
        }
    }

    /// With a token source, replacing any source of the same name
    #[must_use]
    pub fn with_source(mut self, source: TokenSource) -> Self {
        self.register(source);
        self
    }

    /// With retry policy
    #[inline]
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// With token cache
    #[inline]
    #[must_use]
    pub fn with_cache(mut self, cache: TokenCache) -> Self {
        self.cache = cache;
        self
    }

    /// Register a token source
    pub fn register(&mut self, source: TokenSource) {
        self.sources.insert(source.name().to_string(), source);
    }

    /// Registered source by credential name
    #[inline]
    #[must_use]
    pub fn source(&self, name: &str) -> Option<&TokenSource> {
        self.sources.get(name)
    }

    /// Fresh cached token for `cache_key`, if any
    pub async fn get_token(&self, cache_key: &str) -> Option<CachedToken> {
        self.cache.get(cache_key).await
    }

    /// Request a new token from `source`'s endpoint, retrying transient
    /// failures per the retry policy. Does not touch the cache.
    ///
    /// # Errors
    ///
    /// Returns the last failure once retries are exhausted, or immediately
    /// for non-retryable failures.
    pub async fn acquire(&self, source: &TokenSource) -> Result<AccessToken, TokenError> {
        let mut retry = 0;
        loop {
            match self.attempt(source).await {
                Ok(token) => {
                    self.acquisitions.fetch_add(1, Ordering::Relaxed);
                    tracing::info!(
                        source = source.name(),
                        expires_in_secs = token.expires_in.as_secs(),
                        "acquired backend token"
                    );
                    return Ok(token);
                }
                Err(err) if err.is_retryable() && retry < self.retry.max_retries() => {
                    let delay = self.retry.delay(retry);
                    tracing::warn!(
                        source = source.name(),
                        error = %err,
                        retry = retry + 1,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "token request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                Err(err) => {
                    if let TokenError::Endpoint { status, body } = &err {
                        tracing::error!(
                            source = source.name(),
                            status,
                            body = %body,
                            "token endpoint rejected request"
                        );
                    } else {
                        tracing::error!(source = source.name(), error = %err, "token acquisition failed");
                    }
                    return Err(err);
                }
            }
        }
    }

    async fn attempt(&self, source: &TokenSource) -> Result<AccessToken, TokenError> {
        let form = source.form()?;
        let response = self.transport.post_form(source.endpoint(), &form).await?;
        if !response.is_success() {
            return Err(TokenError::endpoint(response.status, response.body));
        }
        AccessToken::from_json(&response.body)
    }

    /// Cached token for the named source, acquiring one on a miss.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::UnknownSource`] for an unregistered name, or
    /// the acquisition failure.
    pub async fn token(&self, name: &str) -> Result<CachedToken, TokenError> {
        let source = self
            .sources
            .get(name)
            .ok_or_else(|| TokenError::UnknownSource(name.to_string()))?;
        let key = source.cache_key();

        let cached = self.populate(&key, source).await?;
        if cached.is_fresh(Instant::now()) {
            return Ok(cached);
        }

        tracing::debug!(key = %key, "cached token past refresh point");
        self.cache.invalidate_bearer(&key, cached.bearer()).await;
        self.populate(&key, source).await
    }

    async fn populate(&self, key: &str, source: &TokenSource) -> Result<CachedToken, TokenError> {
        self.cache
            .get_or_acquire(key, async {
                let acquired_at = Instant::now();
                let token = self.acquire(source).await?;
                Ok(CachedToken::new(token, acquired_at))
            })
            .await
    }

    /// Evict the token cached under `cache_key` if it is still `bearer`.
    ///
    /// A rejection that arrives after another request already replaced the
    /// token leaves the replacement cached.
    pub async fn invalidate_bearer(&self, cache_key: &str, bearer: &str) -> bool {
        let evicted = self.cache.invalidate_bearer(cache_key, bearer).await;
        if evicted {
            tracing::warn!(key = cache_key, "invalidating rejected backend token");
        } else {
            tracing::debug!(key = cache_key, "rejected backend token already replaced");
        }
        evicted
    }

    /// Successful acquisitions so far
    #[inline]
    #[must_use]
    pub fn acquisitions(&self) -> u64 {
        self.acquisitions.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::Credential;
    use crate::transport::TransportResponse;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;
    use url::Url;

    #[derive(Debug, Default)]
    struct Scripted {
        replies: Mutex<VecDeque<Result<TransportResponse, TokenError>>>,
        calls: AtomicU64,
    }

    impl Scripted {
        fn new(replies: Vec<Result<TransportResponse, TokenError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: AtomicU64::new(0),
            })
        }

        fn calls(&self) -> u64 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TokenTransport for Scripted {
        async fn post_form(
            &self,
            _endpoint: &Url,
            _form: &[(&'static str, String)],
        ) -> Result<TransportResponse, TokenError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(ok("fallback", 3600)))
        }
    }

    fn ok(token: &str, expires_in: u64) -> TransportResponse {
        TransportResponse {
            status: 200,
            body: format!(r#"{{"access_token":"{token}","expires_in":{expires_in}}}"#),
        }
    }

    fn status(code: u16) -> TransportResponse {
        TransportResponse {
            status: code,
            body: "{\"error\":\"nope\"}".into(),
        }
    }

    fn provider(transport: Arc<Scripted>) -> TokenProvider {
        TokenProvider::new(transport)
            .with_retry(RetryPolicy::default().without_jitter())
            .with_source(TokenSource::new(
                "orders",
                "https://login.example.com/token".parse().unwrap(),
                "client",
                "api://orders/.default",
                Credential::shared_secret("s"),
            ))
    }

    #[tokio::test(start_paused = true)]
    async fn token_is_reused_until_refresh_point() {
        let transport = Scripted::new(vec![Ok(ok("first", 100)), Ok(ok("second", 100))]);
        let provider = provider(Arc::clone(&transport));

        assert_eq!(provider.token("orders").await.unwrap().bearer(), "first");
        tokio::time::advance(Duration::from_secs(94)).await;
        assert_eq!(provider.token("orders").await.unwrap().bearer(), "first");
        assert_eq!(transport.calls(), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(provider.get_token("orders|api://orders/.default").await.is_none());
        assert_eq!(provider.token("orders").await.unwrap().bearer(), "second");
        assert_eq!(transport.calls(), 2);
        assert_eq!(provider.acquisitions(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn invalidate_forces_reacquisition() {
        let transport = Scripted::new(vec![Ok(ok("first", 3600)), Ok(ok("second", 3600))]);
        let provider = provider(Arc::clone(&transport));

        let first = provider.token("orders").await.unwrap();
        provider
            .invalidate_bearer("orders|api://orders/.default", first.bearer())
            .await;

        assert_eq!(provider.token("orders").await.unwrap().bearer(), "second");
    }

    #[tokio::test(start_paused = true)]
    async fn late_rejection_keeps_replacement_token() {
        let transport = Scripted::new(vec![Ok(ok("first", 3600)), Ok(ok("second", 3600))]);
        let provider = provider(Arc::clone(&transport));
        let key = "orders|api://orders/.default";

        let first = provider.token("orders").await.unwrap();
        assert!(provider.invalidate_bearer(key, first.bearer()).await);
        let second = provider.token("orders").await.unwrap();
        assert_eq!(second.bearer(), "second");

        assert!(!provider.invalidate_bearer(key, first.bearer()).await);
        assert_eq!(provider.token("orders").await.unwrap().bearer(), "second");
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_refresh_keeps_concurrent_replacement() {
        let transport = Scripted::new(vec![Ok(ok("first", 100)), Ok(ok("second", 100))]);
        let provider = provider(Arc::clone(&transport));
        let key = "orders|api://orders/.default";

        let stale = provider.token("orders").await.unwrap();
        tokio::time::advance(Duration::from_secs(96)).await;
        assert_eq!(provider.token("orders").await.unwrap().bearer(), "second");

        // a second caller holding the stale token must not evict "second"
        assert!(!provider.invalidate_bearer(key, stale.bearer()).await);
        assert_eq!(provider.token("orders").await.unwrap().bearer(), "second");
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let transport = Scripted::new(vec![
            Ok(status(503)),
            Err(TokenError::Timeout),
            Ok(ok("third-time", 3600)),
        ]);
        let provider = provider(Arc::clone(&transport));

        let token = provider.token("orders").await.unwrap();
        assert_eq!(token.bearer(), "third-time");
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_are_bounded() {
        let transport = Scripted::new(vec![Ok(status(500)), Ok(status(502)), Ok(status(503))]);
        let provider = provider(Arc::clone(&transport));

        let err = provider.token("orders").await.unwrap_err();
        assert_eq!(err, TokenError::endpoint(503, "{\"error\":\"nope\"}"));
        assert_eq!(transport.calls(), 3);
        assert!(provider.get_token("orders|api://orders/.default").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn client_errors_are_not_retried() {
        let transport = Scripted::new(vec![Ok(status(400))]);
        let provider = provider(Arc::clone(&transport));

        assert!(matches!(
            provider.token("orders").await,
            Err(TokenError::Endpoint { status: 400, .. })
        ));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn unknown_source() {
        let provider = provider(Scripted::new(vec![]));
        assert_eq!(
            provider.token("billing").await.unwrap_err(),
            TokenError::UnknownSource("billing".into())
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_misses_acquire_once() {
        let transport = Scripted::new(vec![Ok(ok("shared", 3600))]);
        let provider = Arc::new(provider(Arc::clone(&transport)));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let provider = Arc::clone(&provider);
                tokio::spawn(async move { provider.token("orders").await })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().bearer(), "shared");
        }

        assert_eq!(transport.calls(), 1);
    }
}
