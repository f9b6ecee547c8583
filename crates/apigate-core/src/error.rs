//! Error types for apigate Core
//!
//! Two families:
//! - [`ConfigError`]: everything wrong with a configuration, raised at load
//!   or plan compile time, never while serving
//! - [`GatewayError`]: per-request failures, each mapped to the status the
//!   client sees via [`GatewayError::client_status`]

use crate::scope::ScopeLevel;
use apigate_policy::SanitizeError;
use apigate_ratelimit::RateLimitError;
use apigate_token::TokenError;
use http::StatusCode;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration or plan compilation failure
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("cannot read {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// Document could not be parsed
    #[error("cannot parse configuration: {0}")]
    Parse(String),

    /// File extension is neither YAML nor TOML
    #[error("unsupported configuration format: {0}")]
    UnsupportedFormat(String),

    /// Root scope must be the global scope
    #[error("root scope {0} must have level global")]
    RootNotGlobal(String),

    /// Runtime setting out of range
    #[error("setting {name}: {reason}")]
    InvalidSetting {
        /// Setting name
        name: &'static str,
        /// What is wrong
        reason: &'static str,
    },

    /// Scope ids must be unique across the tree
    #[error("duplicate scope id {0}")]
    DuplicateScope(String),

    /// Child level must be deeper than its parent's
    #[error("scope {child} ({child_level}) cannot nest under {parent} ({parent_level})")]
    LevelOrder {
        /// Parent scope id
        parent: String,
        /// Parent level
        parent_level: ScopeLevel,
        /// Child scope id
        child: String,
        /// Child level
        child_level: ScopeLevel,
    },

    /// Step kind used in a phase it does not support
    #[error("scope {scope}: step {kind} is not allowed in the {phase} phase")]
    WrongPhase {
        /// Scope id
        scope: String,
        /// Step kind
        kind: &'static str,
        /// Phase name
        phase: &'static str,
    },

    /// `base` in a scope that has nothing to inherit
    #[error("scope {0}: base marker without a parent sequence to inherit")]
    BaseWithoutInheritance(String),

    /// More than one `base` in one step list
    #[error("scope {0}: base marker appears more than once")]
    DuplicateBase(String),

    /// `include` names a fragment that does not exist
    #[error("scope {scope}: unknown fragment {fragment}")]
    UnknownFragment {
        /// Scope id
        scope: String,
        /// Fragment name
        fragment: String,
    },

    /// Fragments may not contain `base` or `include`
    #[error("fragment {fragment}: step {kind} is not allowed inside a fragment")]
    InvalidFragmentStep {
        /// Fragment name
        fragment: String,
        /// Step kind
        kind: &'static str,
    },

    /// One route would admit against the same counter twice
    #[error("route {route}: counter {key} is applied more than once")]
    SharedCounter {
        /// Route id
        route: String,
        /// Counter identity
        key: String,
    },

    /// One route would attach more than one backend credential
    #[error("route {route}: authenticate-backend appears more than once ({first}, then {second})")]
    RepeatedBackendAuth {
        /// Route id
        route: String,
        /// Credential attached first
        first: String,
        /// Credential that would replace it
        second: String,
    },

    /// Policies sharing a counter disagree on its quota
    #[error("counter {key}: quotas disagree ({first} vs {second})")]
    InconsistentQuota {
        /// Counter identity
        key: String,
        /// First quota seen
        first: String,
        /// Conflicting quota
        second: String,
    },

    /// `authenticate-backend` names an unknown credential
    #[error("scope {scope}: unknown credential {credential}")]
    UnknownCredential {
        /// Scope id
        scope: String,
        /// Credential name
        credential: String,
    },

    /// Credential entry is unusable
    #[error("credential {name}: {reason}")]
    InvalidCredential {
        /// Credential name
        name: String,
        /// What is wrong
        reason: String,
    },

    /// Environment variable holding a secret is not set
    #[error("credential {name}: environment variable {var} is not set")]
    MissingSecret {
        /// Credential name
        name: String,
        /// Variable name
        var: String,
    },

    /// Scope names a backend that is not declared
    #[error("scope {scope}: unknown backend {backend}")]
    UnknownBackend {
        /// Scope id
        scope: String,
        /// Backend name
        backend: String,
    },

    /// Leaf scope resolves to no backend
    #[error("route {0} has no backend")]
    NoBackend(String),

    /// Status code outside 100..=999
    #[error("scope {scope}: invalid status code {code}")]
    InvalidStatus {
        /// Scope id
        scope: String,
        /// Offending code
        code: u16,
    },

    /// Header name or value is not valid HTTP
    #[error("scope {scope}: invalid header {header:?}")]
    InvalidHeader {
        /// Scope id
        scope: String,
        /// Offending header
        header: String,
    },

    /// `cache-store` TTL beyond the memoization ceiling
    #[error("scope {scope}: cache ttl of {secs}s is out of range")]
    InvalidTtl {
        /// Scope id
        scope: String,
        /// Requested TTL in seconds
        secs: u64,
    },

    /// Header policy could not be built
    #[error("header policy: {0}")]
    Sanitize(#[from] SanitizeError),

    /// Quota could not be built
    #[error("rate limit: {0}")]
    RateLimit(#[from] RateLimitError),

    /// Token machinery could not be set up
    #[error("token setup: {0}")]
    Token(#[from] TokenError),

    /// Backend client could not be built
    #[error("backend {name}: {reason}")]
    Backend {
        /// Backend name
        name: String,
        /// What failed
        reason: String,
    },
}

impl ConfigError {
    /// Create a parse error
    #[inline]
    pub fn parse(err: impl std::fmt::Display) -> Self {
        Self::Parse(err.to_string())
    }
}

/// Backend transport failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// Request could not be delivered or the answer not read
    #[error("backend transport failure: {0}")]
    Transport(String),
}

/// Per-request failure
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// No plan for the requested route
    #[error("unknown route {0}")]
    UnknownRoute(String),

    /// Plan names a backend that was never built
    #[error("backend {0} not available")]
    UnknownBackend(String),

    /// Backend credential could not be obtained
    #[error("backend token unavailable: {0}")]
    Token(#[from] TokenError),

    /// Rate limiter could not decide
    #[error("rate limiter failure: {0}")]
    RateLimit(#[from] RateLimitError),

    /// Backend could not be reached
    #[error("{0}")]
    Backend(#[from] BackendError),

    /// Backend did not answer in time
    #[error("backend timed out after {0:?}")]
    BackendTimeout(Duration),
}

impl GatewayError {
    /// Status reported to the client
    #[must_use]
    pub fn client_status(&self) -> StatusCode {
        match self {
            Self::UnknownRoute(_) => StatusCode::NOT_FOUND,
            Self::Backend(_) => StatusCode::BAD_GATEWAY,
            Self::BackendTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::UnknownBackend(_) | Self::Token(_) | Self::RateLimit(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Check if the failure is transient
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Token(err) => err.is_retryable(),
            Self::RateLimit(err) => err.is_retryable(),
            Self::Backend(_) | Self::BackendTimeout(_) => true,
            Self::UnknownRoute(_) | Self::UnknownBackend(_) => false,
        }
    }
}
