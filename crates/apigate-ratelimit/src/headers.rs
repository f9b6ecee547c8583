//! Client-facing quota headers
//!
//! - `Retry-After`: whole seconds until a retry can succeed (rejections only)
//! - `X-RateLimit-Limit`: limit of the reported counter
//! - `X-RateLimit-Remaining`: calls left on the reported counter
//!
//! A request may pass several counters (one per nested scope). The
//! [`QuotaReport`] keeps the most restrictive one: the rejecting counter on
//! rejection, otherwise the one with the fewest calls left.

use crate::limiter::Decision;
use http::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use std::time::Duration;

/// `X-RateLimit-Limit`
pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
/// `X-RateLimit-Remaining`
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

/// Rendered quota headers for one decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitHeaders {
    /// Seconds to wait, rejections only
    pub retry_after_secs: Option<u64>,
    /// Counter limit
    pub limit: u64,
    /// Calls left
    pub remaining: u64,
}

impl RateLimitHeaders {
    /// Render headers for `decision`
    #[must_use]
    pub fn from_decision(decision: &Decision) -> Self {
        Self {
            retry_after_secs: decision.retry_after().map(ceil_secs),
            limit: decision.limit(),
            remaining: decision.remaining(),
        }
    }

    /// Write the headers into `headers`, replacing existing values
    pub fn apply(&self, headers: &mut HeaderMap) {
        if let Some(secs) = self.retry_after_secs {
            headers.insert(RETRY_AFTER, HeaderValue::from(secs));
        }
        headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(self.limit));
        headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(self.remaining));
    }
}

// Retry-After is integral; never advertise 0 for a rejection.
fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs() + u64::from(duration.subsec_nanos() > 0);
    secs.max(1)
}

/// Most restrictive decision seen while processing one request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuotaReport {
    reported: Option<Decision>,
}

impl QuotaReport {
    /// Empty report
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a decision, keeping whichever is more restrictive
    pub fn observe(&mut self, decision: Decision) {
        let replace = match (&self.reported, &decision) {
            (None, _) => true,
            (Some(Decision::Rejected { .. }), _) => false,
            (Some(Decision::Allowed { .. }), Decision::Rejected { .. }) => true,
            (Some(current), Decision::Allowed { remaining, .. }) => *remaining < current.remaining(),
        };
        if replace {
            self.reported = Some(decision);
        }
    }

    /// Decision that will be reported
    #[inline]
    #[must_use]
    pub fn reported(&self) -> Option<&Decision> {
        self.reported.as_ref()
    }

    /// Headers for the reported decision
    #[must_use]
    pub fn headers(&self) -> Option<RateLimitHeaders> {
        self.reported.as_ref().map(RateLimitHeaders::from_decision)
    }
}
