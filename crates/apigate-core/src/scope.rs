//! Policy scope levels

use serde::{Deserialize, Serialize};
use std::fmt;

/// Level of a scope in the hierarchy, outermost first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScopeLevel {
    /// Applies to every request
    Global,
    /// Tenant or workspace
    Workspace,
    /// Product grouping several APIs
    Product,
    /// One API
    Api,
    /// One operation of an API
    Operation,
}

impl ScopeLevel {
    /// Lowercase name
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Workspace => "workspace",
            Self::Product => "product",
            Self::Api => "api",
            Self::Operation => "operation",
        }
    }
}

impl fmt::Display for ScopeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_deepen_in_declaration_order() {
        assert!(ScopeLevel::Global < ScopeLevel::Workspace);
        assert!(ScopeLevel::Workspace < ScopeLevel::Product);
        assert!(ScopeLevel::Product < ScopeLevel::Api);
        assert!(ScopeLevel::Api < ScopeLevel::Operation);
    }

    #[test]
    fn kebab_case_names() {
        let level: ScopeLevel = serde_yaml::from_str("operation").unwrap();
        assert_eq!(level, ScopeLevel::Operation);
        assert_eq!(ScopeLevel::Api.to_string(), "api");
    }
}
