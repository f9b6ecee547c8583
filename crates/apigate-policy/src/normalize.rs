//! Error normalization
//!
//! Decision table, evaluated in order:
//!
//! | condition | status | body |
//! |-----------|--------|------|
//! | bypass set | unchanged | kept |
//! | status < 400 | unchanged | kept |
//! | status in passthrough | unchanged | cleared |
//! | otherwise | fallback | cleared |

use http::StatusCode;
use std::collections::BTreeSet;

/// What to do with the response body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyAction {
    /// Leave the body as the backend sent it
    Keep,
    /// Send an empty body
    Clear,
}

/// Normalization result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Normalized {
    /// Status to send
    pub status: StatusCode,
    /// Body treatment
    pub body: BodyAction,
}

/// Apply the normalization table to one status
#[must_use]
pub fn normalize(
    status: StatusCode,
    passthrough: &BTreeSet<StatusCode>,
    fallback: StatusCode,
    bypass: bool,
) -> Normalized {
    if bypass || status.as_u16() < 400 {
        return Normalized {
            status,
            body: BodyAction::Keep,
        };
    }
    if passthrough.contains(&status) {
        return Normalized {
            status,
            body: BodyAction::Clear,
        };
    }
    tracing::debug!(from = status.as_u16(), to = fallback.as_u16(), "normalizing error status");
    Normalized {
        status: fallback,
        body: BodyAction::Clear,
    }
}

/// Passthrough set and fallback status for one scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorMapping {
    passthrough: BTreeSet<StatusCode>,
    fallback: StatusCode,
}

impl ErrorMapping {
    /// Statuses passed through unless configured otherwise
    pub const DEFAULT_PASSTHROUGH: [StatusCode; 4] = [
        StatusCode::NOT_FOUND,
        StatusCode::CONFLICT,
        StatusCode::PAYLOAD_TOO_LARGE,
        StatusCode::TOO_MANY_REQUESTS,
    ];

    /// Create mapping
    #[must_use]
    pub fn new(passthrough: impl IntoIterator<Item = StatusCode>, fallback: StatusCode) -> Self {
        Self {
            passthrough: passthrough.into_iter().collect(),
            fallback,
        }
    }

    /// Passthrough set
    #[inline]
    #[must_use]
    pub fn passthrough(&self) -> &BTreeSet<StatusCode> {
        &self.passthrough
    }

    /// Fallback status
    #[inline]
    #[must_use]
    pub fn fallback(&self) -> StatusCode {
        self.fallback
    }

    /// Normalize `status`, letting a per-request passthrough set replace
    /// the configured one
    #[must_use]
    pub fn apply(
        &self,
        status: StatusCode,
        passthrough_override: Option<&BTreeSet<StatusCode>>,
        bypass: bool,
    ) -> Normalized {
        let passthrough = passthrough_override.unwrap_or(&self.passthrough);
        normalize(status, passthrough, self.fallback, bypass)
    }
}

impl Default for ErrorMapping {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PASSTHROUGH, StatusCode::INTERNAL_SERVER_ERROR)
    }
}

/// Rewrite one status to another ahead of normalization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusRewrite {
    /// Status to match
    pub from: StatusCode,
    /// Replacement status
    pub to: StatusCode,
    /// Whether the rewritten response skips normalization
    pub bypass: bool,
}

impl StatusRewrite {
    /// Replacement and bypass flag when `status` matches
    #[inline]
    #[must_use]
    pub fn rewrite(&self, status: StatusCode) -> Option<(StatusCode, bool)> {
        (status == self.from).then_some((self.to, self.bypass))
    }
}
