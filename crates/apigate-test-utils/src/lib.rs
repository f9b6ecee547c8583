//! Testing utilities for the apigate workspace
//!
//! Shared fakes and fixtures for integration tests.

#![allow(missing_docs)]

use apigate_core::{Backend, BackendError, GatewayConfig, GatewayRequest, GatewayResponse};
use apigate_token::{TokenError, TokenTransport, TransportResponse};
use async_trait::async_trait;
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::StatusCode;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use url::Url;

pub mod fixtures {
    /// RSA key and matching self-signed certificate for signed assertions
    pub const SIGNING_KEY_PEM: &str = include_str!("../fixtures/signing_key.pem");
    pub const SIGNING_CERT_PEM: &str = include_str!("../fixtures/signing_cert.pem");

    /// Subscription key known to [`GATEWAY_YAML`]
    pub const SUBSCRIPTION_KEY: &str = "primary-key-1";

    /// Orders API with nested operation limits and normalized errors
    pub const GATEWAY_YAML: &str = r"
settings:
  backend_timeout_secs: 5
subscriptions:
  - key: primary-key-1
    id: contoso
  - key: primary-key-2
    id: fabrikam
backends:
  orders:
    url: http://orders.local
scopes:
  id: global
  level: global
  inbound:
    - kind: validate-subscription
  outbound:
    - kind: normalize-errors
  children:
    - id: orders-api
      level: api
      backend: orders
      inbound:
        - kind: base
        - kind: rate-limit
          calls: 10
          renewal_period_secs: 30
      children:
        - id: get-order
          level: operation
          inbound:
            - kind: base
            - kind: rate-limit
              calls: 5
              renewal_period_secs: 30
";
}

pub fn config(yaml: &str) -> GatewayConfig {
    GatewayConfig::from_yaml_str(yaml).unwrap()
}

pub fn sample_config() -> GatewayConfig {
    config(fixtures::GATEWAY_YAML)
}

/// `GET route` carrying `key` in the default subscription header
pub fn subscribed(route: &str, key: &str) -> GatewayRequest {
    GatewayRequest::get(route).with_header(
        HeaderName::from_bytes(apigate_core::DEFAULT_SUBSCRIPTION_HEADER.as_bytes()).unwrap(),
        HeaderValue::from_str(key).unwrap(),
    )
}

/// Backend answering from a queue, then with a fallback response
#[derive(Debug)]
pub struct ScriptedBackend {
    replies: Mutex<VecDeque<Result<GatewayResponse, BackendError>>>,
    fallback: GatewayResponse,
    delay: Option<Duration>,
    received: Mutex<Vec<GatewayRequest>>,
    completed: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::answering(GatewayResponse::new(StatusCode::OK))
    }

    pub fn answering(fallback: GatewayResponse) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            fallback,
            delay: None,
            received: Mutex::new(Vec::new()),
            completed: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    #[must_use]
    pub fn then(self, response: GatewayResponse) -> Self {
        self.replies.lock().push_back(Ok(response));
        self
    }

    #[must_use]
    pub fn then_fail(self, reason: &str) -> Self {
        self.replies
            .lock()
            .push_back(Err(BackendError::Transport(reason.to_string())));
        self
    }

    /// Requests seen so far, in order
    pub fn received(&self) -> Vec<GatewayRequest> {
        self.received.lock().clone()
    }

    pub fn calls(&self) -> usize {
        self.received.lock().len()
    }

    /// Calls that ran to completion
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    async fn call(&self, request: GatewayRequest) -> Result<GatewayResponse, BackendError> {
        self.received.lock().push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let reply = self
            .replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(self.fallback.clone()));
        self.completed.fetch_add(1, Ordering::SeqCst);
        reply
    }
}

/// Token endpoint stand-in issuing `token-1`, `token-2`, ...
#[derive(Debug)]
pub struct FakeTokenTransport {
    expires_in: u64,
    scripted: Mutex<VecDeque<Result<TransportResponse, TokenError>>>,
    forms: Mutex<Vec<Vec<(&'static str, String)>>>,
    issued: AtomicUsize,
}

impl FakeTokenTransport {
    pub fn new() -> Self {
        Self {
            expires_in: 3600,
            scripted: Mutex::new(VecDeque::new()),
            forms: Mutex::new(Vec::new()),
            issued: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn with_expires_in(mut self, secs: u64) -> Self {
        self.expires_in = secs;
        self
    }

    /// Answer the next call with `reply` instead of a token
    #[must_use]
    pub fn then(self, reply: Result<TransportResponse, TokenError>) -> Self {
        self.scripted.lock().push_back(reply);
        self
    }

    pub fn calls(&self) -> usize {
        self.forms.lock().len()
    }

    pub fn forms(&self) -> Vec<Vec<(&'static str, String)>> {
        self.forms.lock().clone()
    }
}

impl Default for FakeTokenTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenTransport for FakeTokenTransport {
    async fn post_form(
        &self,
        _endpoint: &Url,
        form: &[(&'static str, String)],
    ) -> Result<TransportResponse, TokenError> {
        self.forms.lock().push(form.to_vec());
        if let Some(reply) = self.scripted.lock().pop_front() {
            return reply;
        }
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(TransportResponse {
            status: 200,
            body: format!(
                r#"{{"access_token":"token-{n}","token_type":"Bearer","expires_in":{}}}"#,
                self.expires_in
            ),
        })
    }
}

/// JSON response helper for scripted backends
pub fn json_response(status: StatusCode, body: &str) -> GatewayResponse {
    GatewayResponse::new(status)
        .with_header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
        .with_body(body.to_string())
}

#[cfg(test)]
mod tests {
    use super::fixtures::{SIGNING_CERT_PEM, SIGNING_KEY_PEM};
    use apigate_token::{AssertionSigner, SigningAlgorithm};

    #[test]
    fn signing_fixtures_parse() {
        let signer = AssertionSigner::from_pem(
            SIGNING_KEY_PEM.as_bytes(),
            SIGNING_CERT_PEM.as_bytes(),
            SigningAlgorithm::Rs256,
        )
        .unwrap();
        assert!(!signer.thumbprint().is_empty());
    }
}
