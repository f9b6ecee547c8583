//! Pipeline orchestrator
//!
//! Runs one [`ExecutionPlan`] for one request:
//! 1. inbound steps in plan order, any of which may answer directly
//! 2. the backend call under the plan's timeout
//! 3. outbound steps in plan order, any of which may replace the answer
//! 4. gateway-owned quota headers
//!
//! An inbound answer skips the backend and every outbound step. Backend
//! transport failures become an empty 502 and timeouts an empty 504, which
//! then flow through the outbound steps like any backend response.
//!
//! No lock is held across an `.await`, so dropping the future part way
//! through leaves counters and caches usable.

use crate::backend::Backend;
use crate::context::{BackendToken, RequestContext};
use crate::error::GatewayError;
use crate::message::{GatewayRequest, GatewayResponse};
use crate::memo::ResponseCache;
use crate::plan::{ExecutionPlan, InboundStep, OutboundStep};
use apigate_policy::BodyAction;
use apigate_ratelimit::RateLimiter;
use apigate_token::{TokenError, TokenProvider};
use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_LENGTH};
use http::{Method, StatusCode};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::Instrument;

/// What a step wants to happen next
#[derive(Debug)]
pub enum Flow {
    /// Run the next step
    Continue,
    /// Stop and answer with this response
    Respond(GatewayResponse),
}

/// Shared services every request runs against
#[derive(Debug, Clone)]
pub struct Pipeline {
    subscriptions: Arc<BTreeMap<String, String>>,
    limiter: RateLimiter,
    tokens: Arc<TokenProvider>,
    responses: ResponseCache,
    backends: HashMap<String, Arc<dyn Backend>>,
}

impl Pipeline {
    /// Create pipeline over the given stores
    #[must_use]
    pub fn new(limiter: RateLimiter, tokens: Arc<TokenProvider>, responses: ResponseCache) -> Self {
        Self {
            subscriptions: Arc::new(BTreeMap::new()),
            limiter,
            tokens,
            responses,
            backends: HashMap::new(),
        }
    }

    /// With subscription key to id index
    #[must_use]
    pub fn with_subscriptions(mut self, subscriptions: BTreeMap<String, String>) -> Self {
        self.subscriptions = Arc::new(subscriptions);
        self
    }

    /// With a named backend
    #[must_use]
    pub fn with_backend(mut self, name: impl Into<String>, backend: Arc<dyn Backend>) -> Self {
        self.backends.insert(name.into(), backend);
        self
    }

    /// Rate limiter
    #[inline]
    #[must_use]
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Token provider
    #[inline]
    #[must_use]
    pub fn tokens(&self) -> &Arc<TokenProvider> {
        &self.tokens
    }

    /// Response cache
    #[inline]
    #[must_use]
    pub fn responses(&self) -> &ResponseCache {
        &self.responses
    }

    /// Whether a backend is registered under `name`
    #[inline]
    #[must_use]
    pub fn has_backend(&self, name: &str) -> bool {
        self.backends.contains_key(name)
    }

    /// Run `plan` for `request`
    pub async fn process(&self, request: GatewayRequest, plan: &ExecutionPlan) -> GatewayResponse {
        let mut ctx = RequestContext::new(plan.route());
        let span = tracing::info_span!(
            "request",
            id = %ctx.request_id,
            route = plan.route(),
            method = %request.method
        );

        async {
            let response = match self.run(request, plan, &mut ctx).await {
                Ok(response) => response,
                Err(err) => {
                    tracing::error!(error = %err, detail = ?err, "request failed");
                    GatewayResponse::new(err.client_status())
                }
            };
            let response = finish(response, &ctx);
            tracing::info!(status = response.status.as_u16(), "request complete");
            response
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        mut request: GatewayRequest,
        plan: &ExecutionPlan,
        ctx: &mut RequestContext,
    ) -> Result<GatewayResponse, GatewayError> {
        for planned in plan.inbound() {
            tracing::debug!(step = planned.step.kind(), origin = %planned.origin, "inbound");
            if let Flow::Respond(response) = self.inbound(&planned.step, &mut request, ctx).await? {
                tracing::debug!(
                    step = planned.step.kind(),
                    status = response.status.as_u16(),
                    "answered before backend"
                );
                return Ok(response);
            }
        }

        let mut response = self.forward(request, plan).await?;

        if response.status == StatusCode::UNAUTHORIZED || response.status == StatusCode::FORBIDDEN {
            if let Some(sent) = ctx.backend_token.take() {
                self.tokens.invalidate_bearer(&sent.cache_key, &sent.bearer).await;
            }
        }

        for planned in plan.outbound() {
            tracing::debug!(step = planned.step.kind(), origin = %planned.origin, "outbound");
            if let Flow::Respond(replacement) = self.outbound(&planned.step, &mut response, ctx).await {
                return Ok(replacement);
            }
        }
        Ok(response)
    }

    async fn inbound(
        &self,
        step: &InboundStep,
        request: &mut GatewayRequest,
        ctx: &mut RequestContext,
    ) -> Result<Flow, GatewayError> {
        match step {
            InboundStep::ValidateSubscription { header } => {
                let subscription = request
                    .headers
                    .get(header)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|key| self.subscriptions.get(key))
                    .cloned();
                request.headers.remove(header);
                match subscription {
                    Some(id) => {
                        ctx.subscription = Some(id);
                        Ok(Flow::Continue)
                    }
                    None => {
                        tracing::warn!(header = %header, "missing or unknown subscription key");
                        Ok(Flow::Respond(GatewayResponse::new(StatusCode::UNAUTHORIZED)))
                    }
                }
            }
            InboundStep::RateLimit { key, quota } => {
                let counter = key.resolve(ctx.subscription_or_anonymous());
                let decision = self.limiter.check_and_increment(&counter, quota).await?;
                ctx.observe(decision);
                if decision.is_allowed() {
                    Ok(Flow::Continue)
                } else {
                    Ok(Flow::Respond(GatewayResponse::new(StatusCode::TOO_MANY_REQUESTS)))
                }
            }
            InboundStep::AuthenticateBackend { credential } => {
                let token = self.tokens.token(credential).await?;
                let value = HeaderValue::from_str(&format!("Bearer {}", token.bearer()))
                    .map_err(|_| TokenError::MalformedResponse("token is not a valid header value".into()))?;
                request.headers.insert(AUTHORIZATION, value);
                ctx.backend_token = self.tokens.source(credential).map(|source| BackendToken {
                    cache_key: source.cache_key(),
                    bearer: token.bearer().to_string(),
                });
                Ok(Flow::Continue)
            }
            InboundStep::CacheLookup { vary_by } => {
                if request.method != Method::GET {
                    return Ok(Flow::Continue);
                }
                let key = ResponseCache::key_for(request, vary_by);
                if let Some(hit) = self.responses.get(&key).await {
                    tracing::debug!(key = %key, "response cache hit");
                    return Ok(Flow::Respond(hit));
                }
                ctx.cache_key = Some(key);
                Ok(Flow::Continue)
            }
            InboundStep::SetHeader {
                name,
                value,
                append,
            } => {
                set_header(&mut request.headers, name, value, *append);
                Ok(Flow::Continue)
            }
            InboundStep::ReturnResponse(response) => Ok(Flow::Respond(response.clone())),
        }
    }

    async fn forward(
        &self,
        request: GatewayRequest,
        plan: &ExecutionPlan,
    ) -> Result<GatewayResponse, GatewayError> {
        let backend = self
            .backends
            .get(plan.backend())
            .ok_or_else(|| GatewayError::UnknownBackend(plan.backend().to_string()))?;

        let timeout = plan.backend_timeout();
        let outcome = match tokio::time::timeout(timeout, backend.call(request)).await {
            Ok(Ok(response)) => return Ok(response),
            Ok(Err(err)) => GatewayError::Backend(err),
            Err(_) => GatewayError::BackendTimeout(timeout),
        };
        tracing::warn!(backend = plan.backend(), error = %outcome, "backend call failed");
        Ok(GatewayResponse::new(outcome.client_status()))
    }

    async fn outbound(
        &self,
        step: &OutboundStep,
        response: &mut GatewayResponse,
        ctx: &mut RequestContext,
    ) -> Flow {
        match step {
            OutboundStep::CacheStore { ttl } => {
                if response.status == StatusCode::OK {
                    if let Some(key) = ctx.cache_key.take() {
                        self.responses.insert(key, response.clone(), *ttl).await;
                    }
                }
            }
            OutboundStep::SetPassthrough(statuses) => {
                ctx.passthrough = Some(statuses.clone());
            }
            OutboundStep::MapStatus(rewrite) => {
                if let Some((status, bypass)) = rewrite.rewrite(response.status) {
                    tracing::debug!(from = response.status.as_u16(), to = status.as_u16(), "status rewritten");
                    response.status = status;
                    ctx.bypass |= bypass;
                }
            }
            OutboundStep::NormalizeErrors(mapping) => {
                let normalized = mapping.apply(response.status, ctx.passthrough.as_ref(), ctx.bypass);
                if normalized.status != response.status {
                    tracing::debug!(
                        from = response.status.as_u16(),
                        to = normalized.status.as_u16(),
                        "error normalized"
                    );
                }
                response.status = normalized.status;
                if normalized.body == BodyAction::Clear {
                    response.body = Bytes::new();
                    response.headers.remove(CONTENT_LENGTH);
                }
            }
            OutboundStep::SanitizeHeaders(policy) => {
                let removed = policy.apply(&mut response.headers);
                tracing::debug!(removed, "headers sanitized");
            }
            OutboundStep::SetHeader {
                name,
                value,
                append,
            } => set_header(&mut response.headers, name, value, *append),
            OutboundStep::ReturnResponse(replacement) => return Flow::Respond(replacement.clone()),
        }
        Flow::Continue
    }
}

fn set_header(headers: &mut HeaderMap, name: &HeaderName, value: &HeaderValue, append: bool) {
    if append {
        headers.append(name.clone(), value.clone());
    } else {
        headers.insert(name.clone(), value.clone());
    }
}

/// Attach gateway-owned headers
fn finish(mut response: GatewayResponse, ctx: &RequestContext) -> GatewayResponse {
    if let Some(headers) = ctx.quota.headers() {
        headers.apply(&mut response.headers);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::StaticBackend;
    use crate::config::GatewayConfig;
    use crate::plan::PlanCompiler;
    use apigate_token::HttpTokenTransport;

    fn pipeline(backend: GatewayResponse) -> Pipeline {
        let tokens = TokenProvider::new(Arc::new(HttpTokenTransport::with_default_timeout().unwrap()));
        Pipeline::new(RateLimiter::in_memory(), Arc::new(tokens), ResponseCache::default())
            .with_subscriptions(BTreeMap::from([("key-1".to_string(), "contoso".to_string())]))
            .with_backend("b", Arc::new(StaticBackend::new(backend)))
    }

    fn plan(yaml: &str, route: &str) -> ExecutionPlan {
        let config = GatewayConfig::from_yaml_str(yaml).unwrap();
        let plans = PlanCompiler::new(&config).compile().unwrap();
        plans[route].as_ref().clone()
    }

    #[tokio::test]
    async fn missing_subscription_is_401_and_skips_outbound() {
        let plan = plan(
            r"
backends: { b: { url: 'http://b.local' } }
scopes:
  id: global
  level: global
  backend: b
  inbound: [{ kind: validate-subscription }]
  outbound: [{ kind: set-header, name: x-seen, value: 'yes' }]
",
            "global",
        );
        let pipeline = pipeline(GatewayResponse::new(StatusCode::OK));

        let rejected = pipeline.process(GatewayRequest::get("global"), &plan).await;
        assert_eq!(rejected.status, StatusCode::UNAUTHORIZED);
        assert_eq!(rejected.header("x-seen"), None);

        let admitted = pipeline
            .process(
                GatewayRequest::get("global")
                    .with_header("ocp-apim-subscription-key", HeaderValue::from_static("key-1")),
                &plan,
            )
            .await;
        assert_eq!(admitted.status, StatusCode::OK);
        assert_eq!(admitted.header("x-seen"), Some("yes"));
    }

    #[tokio::test]
    async fn normalization_clears_body() {
        let plan = plan(
            r"
backends: { b: { url: 'http://b.local' } }
scopes:
  id: global
  level: global
  backend: b
  outbound: [{ kind: normalize-errors }]
",
            "global",
        );
        let backend = GatewayResponse::new(StatusCode::BAD_REQUEST)
            .with_header(CONTENT_LENGTH, HeaderValue::from_static("11"))
            .with_body("stack trace");
        let response = pipeline(backend).process(GatewayRequest::get("global"), &plan).await;

        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.body.is_empty());
        assert_eq!(response.header("content-length"), None);
    }

    #[tokio::test]
    async fn passthrough_override_replaces_configured_set() {
        let plan = plan(
            r"
backends: { b: { url: 'http://b.local' } }
scopes:
  id: global
  level: global
  backend: b
  outbound:
    - kind: set-passthrough
      statuses: [400]
    - kind: normalize-errors
",
            "global",
        );
        let pipeline = pipeline(GatewayResponse::new(StatusCode::BAD_REQUEST).with_body("detail"));
        let response = pipeline.process(GatewayRequest::get("global"), &plan).await;

        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert!(response.body.is_empty());
    }

    #[tokio::test]
    async fn outbound_return_response_stops_remaining_steps() {
        let plan = plan(
            r"
backends: { b: { url: 'http://b.local' } }
scopes:
  id: global
  level: global
  backend: b
  outbound:
    - kind: return-response
      status: 503
      headers: { retry-after: '30' }
      body: maintenance
    - kind: normalize-errors
",
            "global",
        );
        let response = pipeline(GatewayResponse::new(StatusCode::OK))
            .process(GatewayRequest::get("global"), &plan)
            .await;

        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.body_text(), "maintenance");
        assert_eq!(response.header("retry-after"), Some("30"));
    }

    #[tokio::test]
    async fn unregistered_backend_is_500() {
        let plan = plan(
            r"
backends: { other: { url: 'http://o.local' } }
scopes: { id: global, level: global, backend: other }
",
            "global",
        );
        let response = pipeline(GatewayResponse::new(StatusCode::OK))
            .process(GatewayRequest::get("global"), &plan)
            .await;
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.body.is_empty());
    }
}
