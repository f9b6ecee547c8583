//! Counter keys
//!
//! Per-client limits count per `(scope, subscription)`, so nested scopes keep
//! independent counters for the same caller. Per-resource limits ignore the
//! caller entirely.

use std::fmt;

/// Subscription id used when a request carries none
pub const ANONYMOUS_SUBSCRIPTION: &str = "anonymous";

/// Identity of one counter in the store
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CounterKey(String);

impl CounterKey {
    /// Counter for one caller within one scope
    #[must_use]
    pub fn per_client(scope_id: &str, subscription_id: &str) -> Self {
        Self(format!("client:{scope_id}:{subscription_id}"))
    }

    /// Counter shared by every caller of one resource
    #[must_use]
    pub fn per_resource(resource_id: &str) -> Self {
        Self(format!("resource:{resource_id}"))
    }

    /// Key as stored
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CounterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CounterKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
