//! Token acquisition errors
//!
//! Display output never includes token endpoint response bodies; they stay
//! in the `Endpoint` variant for server-side logging only.

/// Token acquisition failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    /// Connection-level failure reaching the endpoint
    #[error("token endpoint unreachable: {0}")]
    Transport(String),

    /// Endpoint did not answer in time
    #[error("token endpoint timed out")]
    Timeout,

    /// Endpoint answered with a non-success status
    #[error("token endpoint returned status {status}")]
    Endpoint {
        /// HTTP status
        status: u16,
        /// Raw response body, for logs only
        body: String,
    },

    /// Success response without a usable token
    #[error("malformed token response: {0}")]
    MalformedResponse(String),

    /// Credential material could not be loaded
    #[error("credential error: {0}")]
    Credential(String),

    /// Client assertion could not be signed
    #[error("assertion signing failed: {0}")]
    Signing(String),

    /// No token source registered under this name
    #[error("unknown token source: {0}")]
    UnknownSource(String),
}

impl TokenError {
    /// Check if a retry might succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout => true,
            Self::Endpoint { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Create endpoint error
    #[inline]
    pub fn endpoint(status: u16, body: impl Into<String>) -> Self {
        Self::Endpoint {
            status,
            body: body.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_classification() {
        assert!(TokenError::Timeout.is_retryable());
        assert!(TokenError::Transport("reset".into()).is_retryable());
        assert!(TokenError::endpoint(503, "").is_retryable());
        assert!(TokenError::endpoint(429, "").is_retryable());
        assert!(!TokenError::endpoint(400, "invalid_client").is_retryable());
        assert!(!TokenError::MalformedResponse("x".into()).is_retryable());
    }

    #[test]
    fn display_hides_endpoint_body() {
        let err = TokenError::endpoint(401, "AADSTS7000215: Invalid client secret");
        assert!(!err.to_string().contains("AADSTS"));
        assert!(err.to_string().contains("401"));
    }
}
