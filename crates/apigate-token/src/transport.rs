//! Token endpoint transport
//!
//! The provider only needs "POST this form, give me status and body", so
//! that is the whole seam. Tests substitute scripted transports.

use crate::error::TokenError;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use std::time::Duration;
use url::Url;

/// Default token endpoint timeout
pub const DEFAULT_TOKEN_TIMEOUT: Duration = Duration::from_secs(10);

/// Raw endpoint answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    /// HTTP status
    pub status: u16,
    /// Response body
    pub body: String,
}

impl TransportResponse {
    /// Whether the status is 2xx
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends form-encoded token requests
#[async_trait]
pub trait TokenTransport: Send + Sync + std::fmt::Debug {
    /// POST `form` as `application/x-www-form-urlencoded` to `endpoint`
    async fn post_form(
        &self,
        endpoint: &Url,
        form: &[(&'static str, String)],
    ) -> Result<TransportResponse, TokenError>;
}

/// reqwest-backed transport
#[derive(Debug, Clone)]
pub struct HttpTokenTransport {
    client: reqwest::Client,
}

impl HttpTokenTransport {
    /// Create transport with a request timeout
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Transport`] if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, TokenError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| TokenError::Transport(err.to_string()))?;
        Ok(Self { client })
    }

    /// Create transport with the 10 second default timeout
    ///
    /// # Errors
    ///
    /// See [`HttpTokenTransport::new`].
    pub fn with_default_timeout() -> Result<Self, TokenError> {
        Self::new(DEFAULT_TOKEN_TIMEOUT)
    }
}

#[async_trait]
impl TokenTransport for HttpTokenTransport {
    async fn post_form(
        &self,
        endpoint: &Url,
        form: &[(&'static str, String)],
    ) -> Result<TransportResponse, TokenError> {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(form.iter().map(|(k, v)| (*k, v.as_str())))
            .finish();

        let response = self
            .client
            .post(endpoint.clone())
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(ACCEPT, "application/json")
            .body(body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(map_reqwest_error)?;
        Ok(TransportResponse { status, body })
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TokenError {
    if err.is_timeout() {
        TokenError::Timeout
    } else {
        TokenError::Transport(err.to_string())
    }
}
