//! Gateway configuration
//!
//! One YAML or TOML document, loaded once:
//!
//! ```yaml
//! settings:
//!   backend_timeout_secs: 30
//! subscriptions:
//!   - key: "primary-key-1"
//!     id: "contoso"
//! credentials:
//!   orders-backend:
//!     token_endpoint: https://login.example.com/tenant/oauth2/v2.0/token
//!     client_id: 00000000-0000-0000-0000-000000000000
//!     scope: api://orders/.default
//!     client_secret_env: ORDERS_CLIENT_SECRET
//! backends:
//!   orders:
//!     url: https://orders.internal.example.com
//! fragments:
//!   strict-errors:
//!     - kind: normalize-errors
//! scopes:
//!   id: global
//!   level: global
//!   inbound:
//!     - kind: validate-subscription
//!   children:
//!     - id: orders-api
//!       level: api
//!       backend: orders
//!       inbound:
//!         - kind: base
//!         - kind: rate-limit
//!           calls: 10
//!           renewal_period_secs: 30
//! ```
//!
//! Structural rules are checked by [`GatewayConfig::validate`]; everything
//! that depends on flattening (phases, base markers, fragments) is checked
//! by the plan compiler.

use crate::error::ConfigError;
use crate::scope::ScopeLevel;
use apigate_policy::SanitizeMode;
use apigate_ratelimit::Algorithm;
use apigate_token::SigningAlgorithm;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Header carrying the subscription key unless a step overrides it
pub const DEFAULT_SUBSCRIPTION_HEADER: &str = "Ocp-Apim-Subscription-Key";

/// Whole configuration document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Runtime settings
    #[serde(default)]
    pub settings: Settings,
    /// Known subscription keys
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionConfig>,
    /// Backend credentials by name
    #[serde(default)]
    pub credentials: IndexMap<String, CredentialConfig>,
    /// Backend services by name
    #[serde(default)]
    pub backends: IndexMap<String, BackendConfig>,
    /// Reusable step lists by name
    #[serde(default)]
    pub fragments: IndexMap<String, Vec<StepConfig>>,
    /// Root of the scope tree
    pub scopes: ScopeConfig,
}

impl GatewayConfig {
    /// Load from a `.yaml`, `.yml` or `.toml` file and validate it
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or parsed, or is invalid.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();

        let config = match extension.as_str() {
            "yaml" | "yml" => Self::from_yaml_str(&text)?,
            "toml" => Self::from_toml_str(&text)?,
            other => return Err(ConfigError::UnsupportedFormat(other.to_string())),
        };
        tracing::info!(path = %path.display(), "loaded gateway configuration");
        Ok(config)
    }

    /// Parse and validate YAML
    ///
    /// # Errors
    ///
    /// Fails on malformed or invalid documents.
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(text).map_err(ConfigError::parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate TOML
    ///
    /// # Errors
    ///
    /// Fails on malformed or invalid documents.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(ConfigError::parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the scope tree shape and cross references
    ///
    /// # Errors
    ///
    /// Returns the first violation found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.settings.janitor_interval_secs == 0 {
            return Err(ConfigError::InvalidSetting {
                name: "janitor_interval_secs",
                reason: "must be positive",
            });
        }
        if self.scopes.level != ScopeLevel::Global {
            return Err(ConfigError::RootNotGlobal(self.scopes.id.clone()));
        }

        let mut seen = HashSet::new();
        self.scopes.walk(None, &mut |scope, parent| {
            if !seen.insert(scope.id.as_str()) {
                return Err(ConfigError::DuplicateScope(scope.id.clone()));
            }
            if let Some(parent) = parent {
                if scope.level <= parent.level {
                    return Err(ConfigError::LevelOrder {
                        parent: parent.id.clone(),
                        parent_level: parent.level,
                        child: scope.id.clone(),
                        child_level: scope.level,
                    });
                }
            }
            if let Some(backend) = &scope.backend {
                if !self.backends.contains_key(backend) {
                    return Err(ConfigError::UnknownBackend {
                        scope: scope.id.clone(),
                        backend: backend.clone(),
                    });
                }
            }
            for step in scope.inbound.iter().chain(&scope.outbound) {
                self.check_references(&scope.id, step)?;
            }
            Ok(())
        })?;

        for (name, steps) in &self.fragments {
            for step in steps {
                self.check_references(name, step)?;
            }
        }
        for (name, credential) in &self.credentials {
            credential.check(name)?;
        }
        Ok(())
    }

    fn check_references(&self, scope: &str, step: &StepConfig) -> Result<(), ConfigError> {
        match step {
            StepConfig::Include { fragment } if !self.fragments.contains_key(fragment) => {
                Err(ConfigError::UnknownFragment {
                    scope: scope.to_string(),
                    fragment: fragment.clone(),
                })
            }
            StepConfig::AuthenticateBackend { credential }
                if !self.credentials.contains_key(credential) =>
            {
                Err(ConfigError::UnknownCredential {
                    scope: scope.to_string(),
                    credential: credential.clone(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Subscription key to subscription id
    #[must_use]
    pub fn subscription_index(&self) -> BTreeMap<String, String> {
        self.subscriptions
            .iter()
            .map(|sub| (sub.key.clone(), sub.id.clone()))
            .collect()
    }
}

/// Runtime settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Backend call timeout unless the backend overrides it
    pub backend_timeout_secs: u64,
    /// Token endpoint timeout
    pub token_timeout_secs: u64,
    /// Retries for transient token endpoint failures
    pub token_retries: u32,
    /// Header read by `validate-subscription`
    pub subscription_header: String,
    /// Memoized response ceiling
    pub response_cache_capacity: u64,
    /// Cached token ceiling
    pub token_cache_capacity: u64,
    /// Counter key ceiling, unbounded when absent
    pub max_counter_keys: Option<usize>,
    /// How often idle counters are purged
    pub janitor_interval_secs: u64,
}

impl Settings {
    /// Create default settings
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With backend timeout
    #[inline]
    #[must_use]
    pub fn with_backend_timeout(mut self, timeout: Duration) -> Self {
        self.backend_timeout_secs = timeout.as_secs();
        self
    }

    /// With token endpoint timeout
    #[inline]
    #[must_use]
    pub fn with_token_timeout(mut self, timeout: Duration) -> Self {
        self.token_timeout_secs = timeout.as_secs();
        self
    }

    /// With counter key ceiling
    #[inline]
    #[must_use]
    pub fn with_max_counter_keys(mut self, max: usize) -> Self {
        self.max_counter_keys = Some(max);
        self
    }

    /// With subscription header
    #[inline]
    #[must_use]
    pub fn with_subscription_header(mut self, header: impl Into<String>) -> Self {
        self.subscription_header = header.into();
        self
    }

    /// Backend timeout as a duration
    #[inline]
    #[must_use]
    pub fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.backend_timeout_secs)
    }

    /// Token endpoint timeout as a duration
    #[inline]
    #[must_use]
    pub fn token_timeout(&self) -> Duration {
        Duration::from_secs(self.token_timeout_secs)
    }

    /// Janitor period as a duration
    #[inline]
    #[must_use]
    pub fn janitor_interval(&self) -> Duration {
        Duration::from_secs(self.janitor_interval_secs)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backend_timeout_secs: 30,
            token_timeout_secs: 10,
            token_retries: 2,
            subscription_header: DEFAULT_SUBSCRIPTION_HEADER.to_string(),
            response_cache_capacity: 10_000,
            token_cache_capacity: 1_000,
            max_counter_keys: None,
            janitor_interval_secs: 60,
        }
    }
}

/// One subscription key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    /// Key presented by clients
    pub key: String,
    /// Subscription id it resolves to
    pub id: String,
}

/// Client-credentials setup for one backend identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialConfig {
    /// OAuth2 token endpoint
    pub token_endpoint: Url,
    /// OAuth2 client id
    pub client_id: String,
    /// Requested scope
    pub scope: String,
    /// Environment variable holding the client secret
    #[serde(default)]
    pub client_secret_env: Option<String>,
    /// Certificate used to sign client assertions
    #[serde(default)]
    pub certificate: Option<CertificateConfig>,
}

impl CredentialConfig {
    fn check(&self, name: &str) -> Result<(), ConfigError> {
        match (&self.client_secret_env, &self.certificate) {
            (Some(_), None) | (None, Some(_)) => Ok(()),
            _ => Err(ConfigError::InvalidCredential {
                name: name.to_string(),
                reason: "exactly one of client_secret_env or certificate is required".into(),
            }),
        }
    }
}

/// PEM files for signed client assertions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateConfig {
    /// RSA private key (PKCS#1 or PKCS#8 PEM)
    pub key_path: PathBuf,
    /// Matching certificate (PEM)
    pub cert_path: PathBuf,
    /// Signature scheme
    #[serde(default)]
    pub algorithm: SigningAlgorithm,
    /// Assertion validity in seconds
    #[serde(default)]
    pub assertion_lifetime_secs: Option<u64>,
}

/// One backend service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL requests are forwarded to
    pub url: Url,
    /// Per-backend timeout override
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// One node of the scope tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeConfig {
    /// Unique id, also the route name
    pub id: String,
    /// Level in the hierarchy
    pub level: ScopeLevel,
    /// Whether the parent's steps apply
    #[serde(default = "default_true")]
    pub inherit: bool,
    /// Backend for this scope and its descendants
    #[serde(default)]
    pub backend: Option<String>,
    /// Request-phase steps
    #[serde(default)]
    pub inbound: Vec<StepConfig>,
    /// Response-phase steps
    #[serde(default)]
    pub outbound: Vec<StepConfig>,
    /// Nested scopes
    #[serde(default)]
    pub children: Vec<ScopeConfig>,
}

impl ScopeConfig {
    /// Visit this scope and every descendant, parents first
    ///
    /// # Errors
    ///
    /// Stops at and returns the first error from `visit`.
    pub fn walk<'a, F>(&'a self, parent: Option<&'a ScopeConfig>, visit: &mut F) -> Result<(), ConfigError>
    where
        F: FnMut(&'a ScopeConfig, Option<&'a ScopeConfig>) -> Result<(), ConfigError>,
    {
        visit(self, parent)?;
        for child in &self.children {
            child.walk(Some(self), visit)?;
        }
        Ok(())
    }

    /// Whether this scope has no children
    #[inline]
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

fn default_true() -> bool {
    true
}

fn default_passthrough() -> Vec<u16> {
    vec![404, 409, 413, 429]
}

fn default_fallback() -> u16 {
    500
}

/// One configured policy step, tagged by `kind`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum StepConfig {
    /// Splice point for the parent's sequence
    Base,
    /// Expand a named fragment in place
    Include {
        /// Fragment name
        fragment: String,
    },
    /// Resolve the subscription key header, 401 when missing or unknown
    ValidateSubscription {
        /// Header override
        #[serde(default)]
        header: Option<String>,
    },
    /// Per-client limit keyed by (enclosing scope, subscription)
    RateLimit {
        /// Calls per window; zero or negative rejects everything
        calls: i64,
        /// Window length
        renewal_period_secs: u64,
        /// Counting algorithm
        #[serde(default)]
        algorithm: Algorithm,
    },
    /// Per-resource limit shared by every caller
    RateLimitByKey {
        /// Calls per window; zero or negative rejects everything
        calls: i64,
        /// Window length
        renewal_period_secs: u64,
        /// Counting algorithm
        #[serde(default)]
        algorithm: Algorithm,
        /// Resource id, defaults to the enclosing scope id
        #[serde(default)]
        counter_key: Option<String>,
    },
    /// Attach a bearer token for a named credential
    AuthenticateBackend {
        /// Credential name
        credential: String,
    },
    /// Serve a memoized GET response when present
    CacheLookup {
        /// Request headers that split cache entries
        #[serde(default)]
        vary_by_headers: Vec<String>,
    },
    /// Memoize 200 responses
    CacheStore {
        /// Entry lifetime
        ttl_secs: u64,
    },
    /// Replace the passthrough set for this request
    SetPassthrough {
        /// Statuses to pass through
        statuses: Vec<u16>,
    },
    /// Rewrite one status to another
    MapStatus {
        /// Status to match
        from: u16,
        /// Replacement
        to: u16,
        /// Skip normalization afterwards
        #[serde(default)]
        bypass: bool,
    },
    /// Collapse error statuses
    NormalizeErrors {
        /// Statuses kept as-is
        #[serde(default = "default_passthrough")]
        passthrough: Vec<u16>,
        /// Status for everything else
        #[serde(default = "default_fallback")]
        fallback: u16,
    },
    /// Strip response headers
    SanitizeHeaders {
        /// Allow or block
        mode: SanitizeMode,
        /// Header names
        #[serde(default)]
        headers: Vec<String>,
        /// Name patterns
        #[serde(default)]
        patterns: Vec<String>,
    },
    /// Set or append a header
    SetHeader {
        /// Header name
        name: String,
        /// Header value
        value: String,
        /// Append instead of replacing
        #[serde(default)]
        append: bool,
    },
    /// Answer immediately with a fixed response
    ReturnResponse {
        /// Status to send
        status: u16,
        /// Headers to send
        #[serde(default)]
        headers: IndexMap<String, String>,
        /// Body to send
        #[serde(default)]
        body: String,
    },
}

impl StepConfig {
    /// Whether this step admits against a rate-limit counter
    #[inline]
    #[must_use]
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimit { .. } | Self::RateLimitByKey { .. })
    }

    /// Configuration `kind` of this step
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Base => "base",
            Self::Include { .. } => "include",
            Self::ValidateSubscription { .. } => "validate-subscription",
            Self::RateLimit { .. } => "rate-limit",
            Self::RateLimitByKey { .. } => "rate-limit-by-key",
            Self::AuthenticateBackend { .. } => "authenticate-backend",
            Self::CacheLookup { .. } => "cache-lookup",
            Self::CacheStore { .. } => "cache-store",
            Self::SetPassthrough { .. } => "set-passthrough",
            Self::MapStatus { .. } => "map-status",
            Self::NormalizeErrors { .. } => "normalize-errors",
            Self::SanitizeHeaders { .. } => "sanitize-headers",
            Self::SetHeader { .. } => "set-header",
            Self::ReturnResponse { .. } => "return-response",
        }
    }
}
