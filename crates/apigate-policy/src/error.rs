//! Policy construction errors

/// Errors building a header policy
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SanitizeError {
    /// Blocklist names a header the gateway must never strip
    #[error("header {0} is protocol-critical and cannot be removed")]
    ProtectedHeader(String),

    /// Pattern failed to compile
    #[error("invalid header pattern {pattern:?}: {reason}")]
    InvalidPattern {
        /// Offending pattern
        pattern: String,
        /// Compiler message
        reason: String,
    },

    /// Name is not a valid HTTP header name
    #[error("invalid header name {0:?}")]
    InvalidHeaderName(String),
}
