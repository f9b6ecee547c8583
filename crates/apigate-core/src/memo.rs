//! Response memoization for `cache-lookup` / `cache-store`
//!
//! Entries carry their own deadline because each `cache-store` step picks
//! its own TTL; the underlying [`TtlCache`] only bounds capacity.

use crate::message::{GatewayRequest, GatewayResponse};
use apigate_store::TtlCache;
use http::header::HeaderName;
use std::fmt::Write;
use std::time::Duration;
use tokio::time::Instant;

/// Longest accepted `cache-store` TTL
pub const MAX_CACHE_TTL: Duration = Duration::from_secs(366 * 24 * 60 * 60);

#[derive(Debug, Clone)]
struct Memoized {
    response: GatewayResponse,
    expires_at: Instant,
}

/// Memoized `GET` responses
#[derive(Debug, Clone)]
pub struct ResponseCache {
    inner: TtlCache<String, Memoized>,
}

impl ResponseCache {
    /// Create cache holding up to `max_entries` responses
    #[must_use]
    pub fn new(max_entries: u64) -> Self {
        Self {
            inner: TtlCache::new(max_entries),
        }
    }

    /// Key for `request`: route, path, query and each vary header in order
    #[must_use]
    pub fn key_for(request: &GatewayRequest, vary_by: &[HeaderName]) -> String {
        let mut key = format!(
            "{} {}?{}",
            request.route,
            request.path,
            request.query.as_deref().unwrap_or_default()
        );
        for name in vary_by {
            let value = request
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            let _ = write!(key, "|{name}={value}");
        }
        key
    }

    /// Unexpired response under `key`
    pub async fn get(&self, key: &str) -> Option<GatewayResponse> {
        let key = key.to_string();
        let entry = self.inner.get(&key).await?;
        if Instant::now() >= entry.expires_at {
            self.inner.invalidate(&key).await;
            return None;
        }
        Some(entry.response)
    }

    /// Memoize `response` for `ttl`, at most [`MAX_CACHE_TTL`]
    pub async fn insert(&self, key: impl Into<String>, response: GatewayResponse, ttl: Duration) {
        let entry = Memoized {
            response,
            expires_at: Instant::now() + ttl.min(MAX_CACHE_TTL),
        };
        self.inner.insert(key.into(), entry).await;
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::{HeaderValue, ACCEPT_LANGUAGE};
    use http::StatusCode;

    #[test]
    fn key_includes_vary_headers() {
        let request = GatewayRequest::get("orders")
            .with_path("/orders")
            .with_query("page=2")
            .with_header(ACCEPT_LANGUAGE, HeaderValue::from_static("fr"));

        assert_eq!(ResponseCache::key_for(&request, &[]), "orders /orders?page=2");
        assert_eq!(
            ResponseCache::key_for(&request, &[ACCEPT_LANGUAGE]),
            "orders /orders?page=2|accept-language=fr"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_at_their_own_deadline() {
        let cache = ResponseCache::default();
        let response = GatewayResponse::new(StatusCode::OK).with_body("cached");
        cache.insert("k", response.clone(), Duration::from_secs(5)).await;

        assert_eq!(cache.get("k").await, Some(response));
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_ttl_is_clamped() {
        let cache = ResponseCache::default();
        let response = GatewayResponse::new(StatusCode::OK);
        cache.insert("k", response.clone(), Duration::MAX).await;

        assert_eq!(cache.get("k").await, Some(response));
    }
}
