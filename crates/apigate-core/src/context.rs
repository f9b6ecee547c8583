//! Per-request state shared between steps

use apigate_ratelimit::{Decision, QuotaReport};
use http::StatusCode;
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

/// Bearer attached to the backend call and where it is cached
#[derive(Clone, PartialEq, Eq)]
pub struct BackendToken {
    /// Token cache key
    pub cache_key: String,
    /// Bearer value that was sent
    pub bearer: String,
}

impl fmt::Debug for BackendToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendToken")
            .field("cache_key", &self.cache_key)
            .field("bearer", &"****")
            .finish()
    }
}

/// Typed variables for one request
///
/// Created when the request enters the pipeline and dropped when it
/// leaves; never shared between requests.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Request id for logs
    pub request_id: Uuid,
    /// Route being served
    pub route: String,
    /// Resolved subscription id
    pub subscription: Option<String>,
    /// Skip error normalization for this response
    pub bypass: bool,
    /// Passthrough set replacing the configured one
    pub passthrough: Option<BTreeSet<StatusCode>>,
    /// Response cache key pending a `cache-store`
    pub cache_key: Option<String>,
    /// Bearer attached to the backend call
    pub backend_token: Option<BackendToken>,
    /// Most restrictive quota decision so far
    pub quota: QuotaReport,
}

impl RequestContext {
    /// Fresh context for `route`
    #[must_use]
    pub fn new(route: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            route: route.into(),
            subscription: None,
            bypass: false,
            passthrough: None,
            cache_key: None,
            backend_token: None,
            quota: QuotaReport::new(),
        }
    }

    /// Subscription id, or the anonymous placeholder
    #[inline]
    #[must_use]
    pub fn subscription_or_anonymous(&self) -> &str {
        self.subscription
            .as_deref()
            .unwrap_or(apigate_ratelimit::key::ANONYMOUS_SUBSCRIPTION)
    }

    /// Record a rate-limit decision
    #[inline]
    pub fn observe(&mut self, decision: Decision) {
        self.quota.observe(decision);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn anonymous_until_resolved() {
        let mut ctx = RequestContext::new("orders");
        assert_eq!(ctx.subscription_or_anonymous(), "anonymous");

        ctx.subscription = Some("contoso".into());
        assert_eq!(ctx.subscription_or_anonymous(), "contoso");
    }

    #[test]
    fn backend_token_debug_hides_bearer() {
        let token = BackendToken {
            cache_key: "orders|api://orders/.default".into(),
            bearer: "secret-bearer".into(),
        };
        let printed = format!("{token:?}");
        assert!(printed.contains("orders|api://orders/.default"));
        assert!(!printed.contains("secret-bearer"));
    }

    #[test]
    fn request_ids_are_unique() {
        assert_ne!(RequestContext::new("a").request_id, RequestContext::new("a").request_id);
    }

    #[test]
    fn keeps_most_restrictive_decision() {
        let mut ctx = RequestContext::new("orders");
        ctx.observe(Decision::Allowed {
            limit: 10,
            remaining: 9,
        });
        ctx.observe(Decision::Allowed {
            limit: 5,
            remaining: 4,
        });
        ctx.observe(Decision::Allowed {
            limit: 100,
            remaining: 50,
        });
        assert_eq!(ctx.quota.reported().map(Decision::remaining), Some(4));

        ctx.observe(Decision::Rejected {
            limit: 5,
            retry_after: Duration::from_secs(3),
        });
        assert!(!ctx.quota.reported().is_some_and(Decision::is_allowed));
    }
}
