//! Response header sanitization
//!
//! Two modes:
//! - **allow**: remove every header not named and not matching an
//!   always-allow pattern
//! - **block**: remove every header named or matching an always-remove
//!   pattern
//!
//! Names compare case-insensitively; patterns are unanchored,
//! case-insensitive regexes. [`PROTECTED_HEADERS`] are never removed. Naming
//! one in a blocklist fails construction, and allowlists or pattern matches
//! simply skip them.

use crate::error::SanitizeError;
use http::header::{HeaderMap, HeaderName};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Headers the sanitizer never strips
pub const PROTECTED_HEADERS: [&str; 4] = [
    "content-length",
    "transfer-encoding",
    "content-type",
    "connection",
];

/// Sanitization mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SanitizeMode {
    /// Keep only listed headers
    Allow,
    /// Remove listed headers
    Block,
}

/// Compiled header policy
#[derive(Debug, Clone)]
pub struct HeaderPolicy {
    mode: SanitizeMode,
    names: HashSet<HeaderName>,
    patterns: Vec<Regex>,
}

impl HeaderPolicy {
    /// Allowlist policy
    ///
    /// # Errors
    ///
    /// Fails on an invalid header name or pattern.
    pub fn allow<N, P>(names: N, patterns: P) -> Result<Self, SanitizeError>
    where
        N: IntoIterator,
        N::Item: AsRef<str>,
        P: IntoIterator,
        P::Item: AsRef<str>,
    {
        Self::build(SanitizeMode::Allow, names, patterns)
    }

    /// Blocklist policy
    ///
    /// # Errors
    ///
    /// Fails on an invalid header name or pattern, or when a protected
    /// header is named.
    pub fn block<N, P>(names: N, patterns: P) -> Result<Self, SanitizeError>
    where
        N: IntoIterator,
        N::Item: AsRef<str>,
        P: IntoIterator,
        P::Item: AsRef<str>,
    {
        Self::build(SanitizeMode::Block, names, patterns)
    }

    /// Policy in the given mode
    ///
    /// # Errors
    ///
    /// See [`HeaderPolicy::allow`] and [`HeaderPolicy::block`].
    pub fn build<N, P>(mode: SanitizeMode, names: N, patterns: P) -> Result<Self, SanitizeError>
    where
        N: IntoIterator,
        N::Item: AsRef<str>,
        P: IntoIterator,
        P::Item: AsRef<str>,
    {
        let names = names
            .into_iter()
            .map(|name| {
                let name = name.as_ref();
                let parsed = HeaderName::from_bytes(name.as_bytes())
                    .map_err(|_| SanitizeError::InvalidHeaderName(name.to_string()))?;
                if mode == SanitizeMode::Block && is_protected(&parsed) {
                    return Err(SanitizeError::ProtectedHeader(parsed.as_str().to_string()));
                }
                Ok(parsed)
            })
            .collect::<Result<HashSet<_>, _>>()?;

        let patterns = patterns
            .into_iter()
            .map(|pattern| {
                let pattern = pattern.as_ref();
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|err| SanitizeError::InvalidPattern {
                        pattern: pattern.to_string(),
                        reason: err.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            mode,
            names,
            patterns,
        })
    }

    /// Mode of this policy
    #[inline]
    #[must_use]
    pub fn mode(&self) -> SanitizeMode {
        self.mode
    }

    /// Distinct header names to remove from `headers`, in first-seen order
    #[must_use]
    pub fn removal_list(&self, headers: &HeaderMap) -> Vec<HeaderName> {
        headers
            .keys()
            .filter(|name| !is_protected(name) && self.should_remove(name))
            .cloned()
            .collect()
    }

    /// Remove every header on the removal list, returning how many names
    /// were removed
    pub fn apply(&self, headers: &mut HeaderMap) -> usize {
        let removal = self.removal_list(headers);
        for name in &removal {
            headers.remove(name);
        }
        if !removal.is_empty() {
            tracing::debug!(removed = removal.len(), mode = ?self.mode, "sanitized response headers");
        }
        removal.len()
    }

    fn should_remove(&self, name: &HeaderName) -> bool {
        let listed = self.names.contains(name)
            || self.patterns.iter().any(|p| p.is_match(name.as_str()));
        match self.mode {
            SanitizeMode::Allow => !listed,
            SanitizeMode::Block => listed,
        }
    }
}

fn is_protected(name: &HeaderName) -> bool {
    PROTECTED_HEADERS.contains(&name.as_str())
}
