//! Backend seam
//!
//! The pipeline forwards through [`Backend`]; the call timeout is applied
//! by the pipeline, not here.
//! - [`HttpBackend`]: forwards over HTTP with `reqwest`
//! - [`StaticBackend`]: answers every call with one fixed response

use crate::error::{BackendError, ConfigError};
use crate::message::{GatewayRequest, GatewayResponse};
use async_trait::async_trait;
use http::header::HOST;
use url::Url;

/// Service requests are forwarded to
#[async_trait]
pub trait Backend: Send + Sync + std::fmt::Debug {
    /// Forward `request` and return the backend's answer
    async fn call(&self, request: GatewayRequest) -> Result<GatewayResponse, BackendError>;
}

/// Forwards requests to a base URL
#[derive(Debug, Clone)]
pub struct HttpBackend {
    name: String,
    base: Url,
    client: reqwest::Client,
}

impl HttpBackend {
    /// Create backend for `base`
    ///
    /// # Errors
    ///
    /// Fails when the HTTP client cannot be built.
    pub fn new(name: impl Into<String>, base: Url) -> Result<Self, ConfigError> {
        let name = name.into();
        let client = reqwest::Client::builder()
            .build()
            .map_err(|err| ConfigError::Backend {
                name: name.clone(),
                reason: err.to_string(),
            })?;
        Ok(Self { name, base, client })
    }

    /// Backend name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Target URL for `request`: the base path followed by the request path
    #[must_use]
    pub fn target(&self, request: &GatewayRequest) -> Url {
        let mut url = self.base.clone();
        let base_path = self.base.path().trim_end_matches('/');
        let request_path = request.path.trim_start_matches('/');
        url.set_path(&format!("{base_path}/{request_path}"));
        url.set_query(request.query.as_deref());
        url
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn call(&self, request: GatewayRequest) -> Result<GatewayResponse, BackendError> {
        let url = self.target(&request);
        let mut headers = request.headers;
        headers.remove(HOST);

        tracing::debug!(backend = %self.name, method = %request.method, url = %url, "forwarding");
        let response = self
            .client
            .request(request.method, url)
            .headers(headers)
            .body(request.body)
            .send()
            .await
            .map_err(|err| BackendError::Transport(err.to_string()))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|err| BackendError::Transport(err.to_string()))?;

        Ok(GatewayResponse {
            status,
            headers,
            body,
        })
    }
}

/// Answers every call with the same response
#[derive(Debug, Clone)]
pub struct StaticBackend {
    response: GatewayResponse,
}

impl StaticBackend {
    /// Create backend answering with `response`
    #[inline]
    #[must_use]
    pub fn new(response: GatewayResponse) -> Self {
        Self { response }
    }
}

#[async_trait]
impl Backend for StaticBackend {
    async fn call(&self, _request: GatewayRequest) -> Result<GatewayResponse, BackendError> {
        Ok(self.response.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;

    #[test]
    fn target_joins_base_path_and_query() {
        let backend =
            HttpBackend::new("orders", Url::parse("https://orders.example.com/api/").unwrap())
                .unwrap();
        let request = GatewayRequest::get("get-order")
            .with_path("/orders/42")
            .with_query("expand=lines");

        assert_eq!(
            backend.target(&request).as_str(),
            "https://orders.example.com/api/orders/42?expand=lines"
        );
    }

    #[tokio::test]
    async fn static_backend_repeats_response() {
        let backend = StaticBackend::new(GatewayResponse::new(StatusCode::CREATED).with_body("ok"));
        for _ in 0..2 {
            let response = backend.call(GatewayRequest::get("any")).await.unwrap();
            assert_eq!(response.status, StatusCode::CREATED);
            assert_eq!(response.body_text(), "ok");
        }
    }
}
