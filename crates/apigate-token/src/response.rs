//! Token endpoint response parsing

use crate::error::TokenError;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

/// Bearer token as issued by the endpoint
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    /// Bearer string
    pub access_token: String,
    /// Reported lifetime
    pub expires_in: Duration,
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("access_token", &"****")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

// Some endpoints emit `expires_in` as a string.
#[derive(Deserialize)]
#[serde(untagged)]
enum ExpiresIn {
    Seconds(u64),
    Text(String),
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: ExpiresIn,
}

impl AccessToken {
    /// Parse a success body
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::MalformedResponse`] when the body lacks a
    /// non-empty `access_token` or an integral `expires_in`.
    pub fn from_json(body: &str) -> Result<Self, TokenError> {
        let parsed: TokenResponse = serde_json::from_str(body)
            .map_err(|err| TokenError::MalformedResponse(err.to_string()))?;

        if parsed.access_token.is_empty() {
            return Err(TokenError::MalformedResponse("empty access_token".into()));
        }
        let secs = match parsed.expires_in {
            ExpiresIn::Seconds(secs) => secs,
            ExpiresIn::Text(text) => text.trim().parse().map_err(|_| {
                TokenError::MalformedResponse(format!("expires_in is not an integer: {text:?}"))
            })?,
        };

        Ok(Self {
            access_token: parsed.access_token,
            expires_in: Duration::from_secs(secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_and_string_lifetimes() {
        let numeric = AccessToken::from_json(r#"{"access_token":"abc","expires_in":3599}"#).unwrap();
        let textual =
            AccessToken::from_json(r#"{"token_type":"Bearer","access_token":"abc","expires_in":"3599"}"#)
                .unwrap();

        assert_eq!(numeric, textual);
        assert_eq!(numeric.expires_in, Duration::from_secs(3599));
    }

    #[test]
    fn missing_or_bad_fields_are_malformed() {
        for body in [
            r#"{"expires_in":10}"#,
            r#"{"access_token":"abc"}"#,
            r#"{"access_token":"","expires_in":10}"#,
            r#"{"access_token":"abc","expires_in":"soon"}"#,
            "not json",
        ] {
            assert!(
                matches!(AccessToken::from_json(body), Err(TokenError::MalformedResponse(_))),
                "{body}"
            );
        }
    }

    #[test]
    fn debug_redacts_bearer() {
        let token = AccessToken::from_json(r#"{"access_token":"abc123","expires_in":1}"#).unwrap();
        assert!(!format!("{token:?}").contains("abc123"));
    }
}
