//! Gateway facade
//!
//! [`GatewayBuilder`] turns a validated [`GatewayConfig`] into a running
//! [`Gateway`]: plans are compiled, credentials resolved and stores
//! created up front, so a gateway that builds never fails on
//! configuration while serving.
//!
//! Every store is injectable (`with_counter_backend`,
//! `with_token_transport`, `with_backend`); nothing is process-global.

use crate::backend::{Backend, HttpBackend};
use crate::config::{CredentialConfig, GatewayConfig, Settings};
use crate::error::ConfigError;
use crate::message::{GatewayRequest, GatewayResponse};
use crate::memo::ResponseCache;
use crate::pipeline::Pipeline;
use crate::plan::{ExecutionPlan, PlanCompiler, PlanSet};
use apigate_ratelimit::{CounterBackend, InMemoryCounters, RateLimiter};
use apigate_token::{
    AssertionSigner, Credential, HttpTokenTransport, RetryPolicy, TokenCache, TokenProvider,
    TokenSource, TokenTransport,
};
use http::StatusCode;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Builder for [`Gateway`]
#[derive(Debug)]
pub struct GatewayBuilder {
    config: GatewayConfig,
    backends: HashMap<String, Arc<dyn Backend>>,
    default_backend: Option<Arc<dyn Backend>>,
    credentials: HashMap<String, Credential>,
    token_transport: Option<Arc<dyn TokenTransport>>,
    counter_backend: Option<Arc<dyn CounterBackend>>,
}

impl GatewayBuilder {
    /// Start from `config`
    #[must_use]
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            backends: HashMap::new(),
            default_backend: None,
            credentials: HashMap::new(),
            token_transport: None,
            counter_backend: None,
        }
    }

    /// Use `backend` for the configured backend `name`
    #[must_use]
    pub fn with_backend(mut self, name: impl Into<String>, backend: Arc<dyn Backend>) -> Self {
        self.backends.insert(name.into(), backend);
        self
    }

    /// Use `backend` for every configured backend not set explicitly
    #[must_use]
    pub fn with_default_backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.default_backend = Some(backend);
        self
    }

    /// Use `credential` for the configured credential `name` instead of
    /// resolving its secret or certificate
    #[must_use]
    pub fn with_credential(mut self, name: impl Into<String>, credential: Credential) -> Self {
        self.credentials.insert(name.into(), credential);
        self
    }

    /// Use `transport` for token endpoint calls
    #[must_use]
    pub fn with_token_transport(mut self, transport: Arc<dyn TokenTransport>) -> Self {
        self.token_transport = Some(transport);
        self
    }

    /// Keep rate-limit counters in `backend`
    #[must_use]
    pub fn with_counter_backend(mut self, backend: Arc<dyn CounterBackend>) -> Self {
        self.counter_backend = Some(backend);
        self
    }

    /// Compile plans and assemble the gateway
    ///
    /// # Errors
    ///
    /// Fails on plan compilation errors, unresolvable credentials or an
    /// HTTP client that cannot be built.
    pub fn build(self) -> Result<Gateway, ConfigError> {
        let GatewayBuilder {
            config,
            mut backends,
            default_backend,
            mut credentials,
            token_transport,
            counter_backend,
        } = self;
        let settings = config.settings.clone();

        let plans = PlanCompiler::new(&config).compile()?;

        let counters = counter_backend.unwrap_or_else(|| match settings.max_counter_keys {
            Some(max) => Arc::new(InMemoryCounters::with_max_keys(max)),
            None => Arc::new(InMemoryCounters::new()),
        });

        let transport = match token_transport {
            Some(transport) => transport,
            None => Arc::new(HttpTokenTransport::new(settings.token_timeout())?),
        };
        let mut tokens = TokenProvider::new(transport)
            .with_retry(RetryPolicy::default().with_max_retries(settings.token_retries))
            .with_cache(TokenCache::new(settings.token_cache_capacity));
        for (name, entry) in &config.credentials {
            let credential = match credentials.remove(name) {
                Some(credential) => credential,
                None => resolve_credential(name, entry)?,
            };
            tokens.register(TokenSource::new(
                name.clone(),
                entry.token_endpoint.clone(),
                entry.client_id.clone(),
                entry.scope.clone(),
                credential,
            ));
        }

        let mut pipeline = Pipeline::new(
            RateLimiter::new(counters),
            Arc::new(tokens),
            ResponseCache::new(settings.response_cache_capacity),
        )
        .with_subscriptions(config.subscription_index());
        for (name, backend) in &config.backends {
            let backend: Arc<dyn Backend> = match (backends.remove(name), &default_backend) {
                (Some(backend), _) => backend,
                (None, Some(default)) => Arc::clone(default),
                (None, None) => Arc::new(HttpBackend::new(name.clone(), backend.url.clone())?),
            };
            pipeline = pipeline.with_backend(name.clone(), backend);
        }

        tracing::info!(
            routes = plans.len(),
            backends = config.backends.len(),
            credentials = config.credentials.len(),
            "gateway ready"
        );
        Ok(Gateway {
            plans,
            pipeline,
            settings,
        })
    }
}

fn resolve_credential(name: &str, entry: &CredentialConfig) -> Result<Credential, ConfigError> {
    if let Some(var) = &entry.client_secret_env {
        let secret = std::env::var(var).map_err(|_| ConfigError::MissingSecret {
            name: name.to_string(),
            var: var.clone(),
        })?;
        return Ok(Credential::shared_secret(secret));
    }
    if let Some(cert) = &entry.certificate {
        let mut signer = AssertionSigner::from_files(&cert.key_path, &cert.cert_path, cert.algorithm)
            .map_err(|err| ConfigError::InvalidCredential {
                name: name.to_string(),
                reason: err.to_string(),
            })?;
        if let Some(secs) = cert.assertion_lifetime_secs {
            signer = signer.with_lifetime(Duration::from_secs(secs));
        }
        return Ok(Credential::SignedAssertion(signer));
    }
    Err(ConfigError::InvalidCredential {
        name: name.to_string(),
        reason: "no secret source configured".into(),
    })
}

/// Compiled plans plus the shared pipeline
#[derive(Debug, Clone)]
pub struct Gateway {
    plans: PlanSet,
    pipeline: Pipeline,
    settings: Settings,
}

impl Gateway {
    /// Builder over `config`
    #[inline]
    #[must_use]
    pub fn builder(config: GatewayConfig) -> GatewayBuilder {
        GatewayBuilder::new(config)
    }

    /// Gateway with HTTP backends and the HTTP token transport
    ///
    /// # Errors
    ///
    /// See [`GatewayBuilder::build`].
    pub fn from_config(config: GatewayConfig) -> Result<Self, ConfigError> {
        GatewayBuilder::new(config).build()
    }

    /// Serve one request
    pub async fn process(&self, request: GatewayRequest) -> GatewayResponse {
        match self.plans.get(&request.route) {
            Some(plan) => self.pipeline.process(request, plan).await,
            None => {
                tracing::warn!(route = %request.route, "no plan for route");
                GatewayResponse::new(StatusCode::NOT_FOUND)
            }
        }
    }

    /// Serve one request unless `disconnect` resolves first, in which case
    /// the remaining work is abandoned and `None` returned
    pub async fn process_until<D>(&self, request: GatewayRequest, disconnect: D) -> Option<GatewayResponse>
    where
        D: Future<Output = ()>,
    {
        let route = request.route.clone();
        tokio::select! {
            biased;
            () = disconnect => {
                tracing::info!(route = %route, "client disconnected, request abandoned");
                None
            }
            response = self.process(request) => Some(response),
        }
    }

    /// Plan for `route`
    #[inline]
    #[must_use]
    pub fn plan(&self, route: &str) -> Option<&Arc<ExecutionPlan>> {
        self.plans.get(route)
    }

    /// Every compiled plan by route
    #[inline]
    #[must_use]
    pub fn plans(&self) -> &PlanSet {
        &self.plans
    }

    /// Shared pipeline
    #[inline]
    #[must_use]
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Runtime settings
    #[inline]
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Start the counter janitor at the configured `janitor_interval_secs`
    #[must_use]
    pub fn start_janitor(&self) -> JoinHandle<()> {
        self.spawn_janitor(self.settings.janitor_interval())
    }

    /// Periodically purge idle rate-limit counters until the handle is
    /// aborted
    #[must_use]
    pub fn spawn_janitor(&self, period: Duration) -> JoinHandle<()> {
        let limiter = self.pipeline.limiter().clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let purged = limiter.purge_expired();
                if purged > 0 {
                    tracing::debug!(purged, "purged idle counters");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::StaticBackend;

    const CONFIG: &str = r"
backends:
  orders: { url: 'http://orders.local' }
scopes:
  id: global
  level: global
  children:
    - id: orders-api
      level: api
      backend: orders
      inbound:
        - kind: rate-limit
          calls: 1
          renewal_period_secs: 1
";

    fn gateway() -> Gateway {
        Gateway::builder(GatewayConfig::from_yaml_str(CONFIG).unwrap())
            .with_default_backend(Arc::new(StaticBackend::new(GatewayResponse::new(StatusCode::OK))))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let response = gateway().process(GatewayRequest::get("nowhere")).await;
        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert!(response.body.is_empty());
    }

    #[tokio::test]
    async fn missing_secret_fails_build() {
        let config = GatewayConfig::from_yaml_str(
            r"
credentials:
  orders:
    token_endpoint: https://login.example.com/token
    client_id: c
    scope: s
    client_secret_env: APIGATE_TEST_SECRET_THAT_IS_NEVER_SET
backends: { orders: { url: 'http://orders.local' } }
scopes: { id: global, level: global, backend: orders }
",
        )
        .unwrap();

        let err = Gateway::from_config(config).unwrap_err();
        assert!(matches!(err, ConfigError::MissingSecret { ref var, .. } if var == "APIGATE_TEST_SECRET_THAT_IS_NEVER_SET"));
    }

    #[tokio::test(start_paused = true)]
    async fn janitor_purges_idle_counters() {
        let gateway = gateway();
        let response = gateway.process(GatewayRequest::get("orders-api")).await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(gateway.pipeline().limiter().backend().len(), 1);

        let janitor = gateway.spawn_janitor(Duration::from_secs(1));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(gateway.pipeline().limiter().backend().len(), 0);
        janitor.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn janitor_runs_at_configured_interval() {
        let config = GatewayConfig::from_yaml_str(&format!("settings: {{ janitor_interval_secs: 30 }}\n{CONFIG}"))
            .unwrap();
        let gateway = Gateway::builder(config)
            .with_default_backend(Arc::new(StaticBackend::new(GatewayResponse::new(StatusCode::OK))))
            .build()
            .unwrap();
        gateway.process(GatewayRequest::get("orders-api")).await;
        let janitor = gateway.start_janitor();

        // the counter idles out after 2s but the first sweep past that is at 30s
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(gateway.pipeline().limiter().backend().len(), 1);

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(gateway.pipeline().limiter().backend().len(), 0);
        janitor.abort();
    }
}
