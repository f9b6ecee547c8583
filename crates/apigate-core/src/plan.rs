//! Execution plan compilation
//!
//! The scope tree is flattened once at load. For every routable scope the
//! compiler walks the chain Global → … → route and builds each phase's
//! effective sequence:
//! - a scope's own steps follow its parent's effective sequence, unless
//! - a `base` marker splices the parent's sequence at the marker, or
//! - `inherit: false` drops the parent's sequence entirely
//!
//! `include` expands a fragment in place; the expanded steps belong to the
//! including scope, so a fragment's `rate-limit` counts per includer.
//!
//! Compiled steps are typed per phase, so the pipeline never re-validates
//! configuration while serving.

use crate::config::{GatewayConfig, ScopeConfig, StepConfig};
use crate::error::ConfigError;
use crate::memo::MAX_CACHE_TTL;
use crate::message::GatewayResponse;
use apigate_policy::{ErrorMapping, HeaderPolicy, StatusRewrite};
use apigate_ratelimit::{CounterKey, Quota};
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::StatusCode;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Pipeline phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Before the backend call
    Inbound,
    /// After the backend call
    Outbound,
}

impl Phase {
    /// Lowercase name
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

/// Which counter a rate-limit step uses
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LimitKey {
    /// One counter per subscription within `scope`
    PerClient {
        /// Enclosing scope id
        scope: String,
    },
    /// One counter for `resource`, whoever calls
    PerResource {
        /// Resource id
        resource: String,
    },
}

impl LimitKey {
    /// Counter for this request
    #[must_use]
    pub fn resolve(&self, subscription: &str) -> CounterKey {
        match self {
            Self::PerClient { scope } => CounterKey::per_client(scope, subscription),
            Self::PerResource { resource } => CounterKey::per_resource(resource),
        }
    }

    fn identity(&self) -> String {
        match self {
            Self::PerClient { scope } => format!("client:{scope}"),
            Self::PerResource { resource } => format!("resource:{resource}"),
        }
    }
}

/// Compiled request-phase step
#[derive(Debug, Clone)]
pub enum InboundStep {
    /// Resolve the subscription key header
    ValidateSubscription {
        /// Header holding the key
        header: HeaderName,
    },
    /// Admit against one counter
    RateLimit {
        /// Counter selection
        key: LimitKey,
        /// Quota for the counter
        quota: Quota,
    },
    /// Attach a bearer token
    AuthenticateBackend {
        /// Credential name
        credential: String,
    },
    /// Serve a memoized response
    CacheLookup {
        /// Request headers that split entries
        vary_by: Vec<HeaderName>,
    },
    /// Set or append a request header
    SetHeader {
        /// Header name
        name: HeaderName,
        /// Header value
        value: HeaderValue,
        /// Append instead of replace
        append: bool,
    },
    /// Answer immediately
    ReturnResponse(GatewayResponse),
}

impl InboundStep {
    /// Configuration kind
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ValidateSubscription { .. } => "validate-subscription",
            Self::RateLimit {
                key: LimitKey::PerClient { .. },
                ..
            } => "rate-limit",
            Self::RateLimit { .. } => "rate-limit-by-key",
            Self::AuthenticateBackend { .. } => "authenticate-backend",
            Self::CacheLookup { .. } => "cache-lookup",
            Self::SetHeader { .. } => "set-header",
            Self::ReturnResponse(_) => "return-response",
        }
    }

    fn detail(&self) -> String {
        match self {
            Self::ValidateSubscription { header } => format!("header={header}"),
            Self::RateLimit { key, quota } => format!(
                "{} calls/{}s {} counter={}",
                quota.limit(),
                quota.window().as_secs(),
                quota.algorithm(),
                key.identity()
            ),
            Self::AuthenticateBackend { credential } => format!("credential={credential}"),
            Self::CacheLookup { vary_by } => format!("vary={}", join_names(vary_by)),
            Self::SetHeader { name, append, .. } => header_detail(name, *append),
            Self::ReturnResponse(response) => format!("status={}", response.status.as_u16()),
        }
    }
}

/// Compiled response-phase step
#[derive(Debug, Clone)]
pub enum OutboundStep {
    /// Memoize 200 responses
    CacheStore {
        /// Entry lifetime
        ttl: Duration,
    },
    /// Replace the passthrough set for this request
    SetPassthrough(BTreeSet<StatusCode>),
    /// Rewrite one status
    MapStatus(StatusRewrite),
    /// Collapse error statuses
    NormalizeErrors(ErrorMapping),
    /// Strip headers
    SanitizeHeaders(HeaderPolicy),
    /// Set or append a response header
    SetHeader {
        /// Header name
        name: HeaderName,
        /// Header value
        value: HeaderValue,
        /// Append instead of replace
        append: bool,
    },
    /// Replace the response and stop
    ReturnResponse(GatewayResponse),
}

impl OutboundStep {
    /// Configuration kind
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CacheStore { .. } => "cache-store",
            Self::SetPassthrough(_) => "set-passthrough",
            Self::MapStatus(_) => "map-status",
            Self::NormalizeErrors(_) => "normalize-errors",
            Self::SanitizeHeaders(_) => "sanitize-headers",
            Self::SetHeader { .. } => "set-header",
            Self::ReturnResponse(_) => "return-response",
        }
    }

    fn detail(&self) -> String {
        match self {
            Self::CacheStore { ttl } => format!("ttl={}s", ttl.as_secs()),
            Self::SetPassthrough(statuses) => format!("statuses={}", join_statuses(statuses)),
            Self::MapStatus(rewrite) => format!(
                "{}->{}{}",
                rewrite.from.as_u16(),
                rewrite.to.as_u16(),
                if rewrite.bypass { " bypass" } else { "" }
            ),
            Self::NormalizeErrors(mapping) => format!(
                "passthrough={} fallback={}",
                join_statuses(mapping.passthrough()),
                mapping.fallback().as_u16()
            ),
            Self::SanitizeHeaders(policy) => format!("mode={:?}", policy.mode()).to_lowercase(),
            Self::SetHeader { name, append, .. } => header_detail(name, *append),
            Self::ReturnResponse(response) => format!("status={}", response.status.as_u16()),
        }
    }
}

fn join_names(names: &[HeaderName]) -> String {
    names.iter().map(HeaderName::as_str).collect::<Vec<_>>().join(",")
}

fn join_statuses(statuses: &BTreeSet<StatusCode>) -> String {
    statuses
        .iter()
        .map(|s| s.as_u16().to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn header_detail(name: &HeaderName, append: bool) -> String {
    if append {
        format!("append {name}")
    } else {
        format!("set {name}")
    }
}

/// A compiled step and the scope it came from
#[derive(Debug, Clone)]
pub struct Planned<S> {
    /// Scope that contributed the step
    pub origin: String,
    /// The step
    pub step: S,
}

/// Flattened policy sequence for one route
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    route: String,
    chain: Vec<String>,
    backend: String,
    backend_timeout: Duration,
    inbound: Vec<Planned<InboundStep>>,
    outbound: Vec<Planned<OutboundStep>>,
}

impl ExecutionPlan {
    /// Route this plan serves
    #[inline]
    #[must_use]
    pub fn route(&self) -> &str {
        &self.route
    }

    /// Scope ids from Global to the route
    #[inline]
    #[must_use]
    pub fn chain(&self) -> &[String] {
        &self.chain
    }

    /// Backend name
    #[inline]
    #[must_use]
    pub fn backend(&self) -> &str {
        &self.backend
    }

    /// Backend call timeout
    #[inline]
    #[must_use]
    pub fn backend_timeout(&self) -> Duration {
        self.backend_timeout
    }

    /// Request-phase steps in order
    #[inline]
    #[must_use]
    pub fn inbound(&self) -> &[Planned<InboundStep>] {
        &self.inbound
    }

    /// Response-phase steps in order
    #[inline]
    #[must_use]
    pub fn outbound(&self) -> &[Planned<OutboundStep>] {
        &self.outbound
    }

    /// Serializable summary
    #[must_use]
    pub fn describe(&self) -> PlanDescription {
        PlanDescription {
            route: self.route.clone(),
            chain: self.chain.clone(),
            backend: self.backend.clone(),
            backend_timeout_secs: self.backend_timeout.as_secs(),
            inbound: self
                .inbound
                .iter()
                .map(|p| StepDescription {
                    origin: p.origin.clone(),
                    kind: p.step.kind(),
                    detail: p.step.detail(),
                })
                .collect(),
            outbound: self
                .outbound
                .iter()
                .map(|p| StepDescription {
                    origin: p.origin.clone(),
                    kind: p.step.kind(),
                    detail: p.step.detail(),
                })
                .collect(),
        }
    }
}

/// Human and JSON friendly view of a plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanDescription {
    /// Route
    pub route: String,
    /// Scope chain
    pub chain: Vec<String>,
    /// Backend name
    pub backend: String,
    /// Backend timeout
    pub backend_timeout_secs: u64,
    /// Request-phase steps
    pub inbound: Vec<StepDescription>,
    /// Response-phase steps
    pub outbound: Vec<StepDescription>,
}

/// One step in a [`PlanDescription`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepDescription {
    /// Contributing scope
    pub origin: String,
    /// Step kind
    pub kind: &'static str,
    /// Settings summary
    pub detail: String,
}

impl fmt::Display for PlanDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "route {} -> {} ({}s)", self.route, self.backend, self.backend_timeout_secs)?;
        writeln!(f, "  chain: {}", self.chain.join(" > "))?;
        for (phase, steps) in [("inbound", &self.inbound), ("outbound", &self.outbound)] {
            writeln!(f, "  {phase}:")?;
            for (i, step) in steps.iter().enumerate() {
                writeln!(f, "    {:>2}. [{}] {} {}", i + 1, step.origin, step.kind, step.detail)?;
            }
        }
        Ok(())
    }
}

/// Compiled plans by route
pub type PlanSet = BTreeMap<String, Arc<ExecutionPlan>>;

struct RawStep<'c> {
    origin: &'c str,
    step: &'c StepConfig,
    /// Position among the origin's own rate-limit steps
    slot: usize,
}

/// Flattens a [`GatewayConfig`] into per-route plans
#[derive(Debug, Clone, Copy)]
pub struct PlanCompiler<'c> {
    config: &'c GatewayConfig,
}

impl<'c> PlanCompiler<'c> {
    /// Create compiler
    #[inline]
    #[must_use]
    pub fn new(config: &'c GatewayConfig) -> Self {
        Self { config }
    }

    /// Compile a plan for every scope that resolves to a backend
    ///
    /// # Errors
    ///
    /// Returns the first structural or step error found.
    pub fn compile(&self) -> Result<PlanSet, ConfigError> {
        let mut plans = PlanSet::new();
        let mut chain = Vec::new();
        self.visit(&self.config.scopes, &mut chain, None, &mut plans)?;
        check_counters(&plans)?;
        tracing::debug!(routes = plans.len(), "compiled execution plans");
        Ok(plans)
    }

    fn visit(
        &self,
        scope: &'c ScopeConfig,
        chain: &mut Vec<&'c ScopeConfig>,
        inherited_backend: Option<&'c str>,
        plans: &mut PlanSet,
    ) -> Result<(), ConfigError> {
        chain.push(scope);
        let backend = scope.backend.as_deref().or(inherited_backend);

        match backend {
            Some(backend) => {
                let plan = self.plan_for(chain, backend)?;
                plans.insert(scope.id.clone(), Arc::new(plan));
            }
            None if scope.is_leaf() => return Err(ConfigError::NoBackend(scope.id.clone())),
            None => {
                // not routable itself; still validate its own steps
                self.sequence(chain, Phase::Inbound)?;
                self.sequence(chain, Phase::Outbound)?;
            }
        }

        for child in &scope.children {
            self.visit(child, chain, backend, plans)?;
        }
        chain.pop();
        Ok(())
    }

    fn plan_for(&self, chain: &[&'c ScopeConfig], backend: &str) -> Result<ExecutionPlan, ConfigError> {
        let inbound = self
            .sequence(chain, Phase::Inbound)?
            .into_iter()
            .map(|raw| {
                Ok(Planned {
                    origin: raw.origin.to_string(),
                    step: self.inbound_step(raw.origin, raw.slot, raw.step)?,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        let route = chain.last().map(|s| s.id.clone()).unwrap_or_default();
        check_backend_auth(&route, &inbound)?;
        let outbound = self
            .sequence(chain, Phase::Outbound)?
            .into_iter()
            .map(|raw| {
                Ok(Planned {
                    origin: raw.origin.to_string(),
                    step: outbound_step(raw.origin, raw.step)?,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        let backend_timeout = self
            .config
            .backends
            .get(backend)
            .and_then(|b| b.timeout_secs)
            .map_or_else(|| self.config.settings.backend_timeout(), Duration::from_secs);

        Ok(ExecutionPlan {
            route,
            chain: chain.iter().map(|s| s.id.clone()).collect(),
            backend: backend.to_string(),
            backend_timeout,
            inbound,
            outbound,
        })
    }

    /// Effective raw sequence for the last scope in `chain`
    fn sequence(&self, chain: &[&'c ScopeConfig], phase: Phase) -> Result<Vec<RawStep<'c>>, ConfigError> {
        let Some((scope, parents)) = chain.split_last() else {
            return Ok(Vec::new());
        };
        let own = match phase {
            Phase::Inbound => &scope.inbound,
            Phase::Outbound => &scope.outbound,
        };
        let mut inherited = if scope.inherit && !parents.is_empty() {
            Some(self.sequence(parents, phase)?)
        } else {
            None
        };

        let mut out = Vec::new();
        let mut based = false;
        let mut limits = 0;
        let mut push = |out: &mut Vec<RawStep<'c>>, step: &'c StepConfig| {
            let slot = limits;
            if step.is_rate_limit() {
                limits += 1;
            }
            out.push(RawStep {
                origin: &scope.id,
                step,
                slot,
            });
        };
        for step in own {
            match step {
                StepConfig::Base => {
                    if based {
                        return Err(ConfigError::DuplicateBase(scope.id.clone()));
                    }
                    based = true;
                    let parent = inherited
                        .take()
                        .ok_or_else(|| ConfigError::BaseWithoutInheritance(scope.id.clone()))?;
                    out.extend(parent);
                }
                StepConfig::Include { fragment } => {
                    let steps = self.config.fragments.get(fragment).ok_or_else(|| {
                        ConfigError::UnknownFragment {
                            scope: scope.id.clone(),
                            fragment: fragment.clone(),
                        }
                    })?;
                    for inner in steps {
                        if matches!(inner, StepConfig::Base | StepConfig::Include { .. }) {
                            return Err(ConfigError::InvalidFragmentStep {
                                fragment: fragment.clone(),
                                kind: inner.kind(),
                            });
                        }
                        push(&mut out, inner);
                    }
                }
                other => push(&mut out, other),
            }
        }

        if let Some(parent) = inherited {
            out.splice(0..0, parent);
        }
        Ok(out)
    }

    fn inbound_step(
        &self,
        origin: &str,
        slot: usize,
        step: &StepConfig,
    ) -> Result<InboundStep, ConfigError> {
        let compiled = match step {
            StepConfig::ValidateSubscription { header } => InboundStep::ValidateSubscription {
                header: header_name(
                    origin,
                    header
                        .as_deref()
                        .unwrap_or(&self.config.settings.subscription_header),
                )?,
            },
            StepConfig::RateLimit {
                calls,
                renewal_period_secs,
                algorithm,
            } => InboundStep::RateLimit {
                key: LimitKey::PerClient {
                    scope: counter_scope(origin, slot),
                },
                quota: Quota::new(*calls, Duration::from_secs(*renewal_period_secs), *algorithm)?,
            },
            StepConfig::RateLimitByKey {
                calls,
                renewal_period_secs,
                algorithm,
                counter_key,
            } => InboundStep::RateLimit {
                key: LimitKey::PerResource {
                    resource: counter_key
                        .clone()
                        .unwrap_or_else(|| counter_scope(origin, slot)),
                },
                quota: Quota::new(*calls, Duration::from_secs(*renewal_period_secs), *algorithm)?,
            },
            StepConfig::AuthenticateBackend { credential } => {
                if !self.config.credentials.contains_key(credential) {
                    return Err(ConfigError::UnknownCredential {
                        scope: origin.to_string(),
                        credential: credential.clone(),
                    });
                }
                InboundStep::AuthenticateBackend {
                    credential: credential.clone(),
                }
            }
            StepConfig::CacheLookup { vary_by_headers } => InboundStep::CacheLookup {
                vary_by: vary_by_headers
                    .iter()
                    .map(|h| header_name(origin, h))
                    .collect::<Result<_, _>>()?,
            },
            StepConfig::SetHeader {
                name,
                value,
                append,
            } => InboundStep::SetHeader {
                name: header_name(origin, name)?,
                value: header_value(origin, value)?,
                append: *append,
            },
            StepConfig::ReturnResponse {
                status,
                headers,
                body,
            } => InboundStep::ReturnResponse(fixed_response(origin, *status, headers, body)?),
            other => return Err(wrong_phase(origin, other, Phase::Inbound)),
        };
        Ok(compiled)
    }
}

fn outbound_step(origin: &str, step: &StepConfig) -> Result<OutboundStep, ConfigError> {
    let compiled = match step {
        StepConfig::CacheStore { ttl_secs } => {
            let ttl = Duration::from_secs(*ttl_secs);
            if ttl > MAX_CACHE_TTL {
                return Err(ConfigError::InvalidTtl {
                    scope: origin.to_string(),
                    secs: *ttl_secs,
                });
            }
            OutboundStep::CacheStore { ttl }
        }
        StepConfig::SetPassthrough { statuses } => OutboundStep::SetPassthrough(
            statuses
                .iter()
                .map(|code| status_code(origin, *code))
                .collect::<Result<_, _>>()?,
        ),
        StepConfig::MapStatus { from, to, bypass } => OutboundStep::MapStatus(StatusRewrite {
            from: status_code(origin, *from)?,
            to: status_code(origin, *to)?,
            bypass: *bypass,
        }),
        StepConfig::NormalizeErrors {
            passthrough,
            fallback,
        } => {
            let passthrough = passthrough
                .iter()
                .map(|code| status_code(origin, *code))
                .collect::<Result<Vec<_>, _>>()?;
            OutboundStep::NormalizeErrors(ErrorMapping::new(
                passthrough,
                status_code(origin, *fallback)?,
            ))
        }
        StepConfig::SanitizeHeaders {
            mode,
            headers,
            patterns,
        } => OutboundStep::SanitizeHeaders(HeaderPolicy::build(*mode, headers, patterns)?),
        StepConfig::SetHeader {
            name,
            value,
            append,
        } => OutboundStep::SetHeader {
            name: header_name(origin, name)?,
            value: header_value(origin, value)?,
            append: *append,
        },
        StepConfig::ReturnResponse {
            status,
            headers,
            body,
        } => OutboundStep::ReturnResponse(fixed_response(origin, *status, headers, body)?),
        other => return Err(wrong_phase(origin, other, Phase::Outbound)),
    };
    Ok(compiled)
}

/// Counter identity of a scope's `slot`-th rate limit. The first keeps the
/// bare scope id.
fn counter_scope(origin: &str, slot: usize) -> String {
    if slot == 0 {
        origin.to_string()
    } else {
        format!("{origin}#{}", slot + 1)
    }
}

fn wrong_phase(origin: &str, step: &StepConfig, phase: Phase) -> ConfigError {
    ConfigError::WrongPhase {
        scope: origin.to_string(),
        kind: step.kind(),
        phase: phase.as_str(),
    }
}

fn status_code(scope: &str, code: u16) -> Result<StatusCode, ConfigError> {
    StatusCode::from_u16(code).map_err(|_| ConfigError::InvalidStatus {
        scope: scope.to_string(),
        code,
    })
}

fn header_name(scope: &str, name: &str) -> Result<HeaderName, ConfigError> {
    HeaderName::from_bytes(name.as_bytes()).map_err(|_| ConfigError::InvalidHeader {
        scope: scope.to_string(),
        header: name.to_string(),
    })
}

fn header_value(scope: &str, value: &str) -> Result<HeaderValue, ConfigError> {
    HeaderValue::from_str(value).map_err(|_| ConfigError::InvalidHeader {
        scope: scope.to_string(),
        header: value.to_string(),
    })
}

fn fixed_response(
    scope: &str,
    status: u16,
    headers: &indexmap::IndexMap<String, String>,
    body: &str,
) -> Result<GatewayResponse, ConfigError> {
    let mut response =
        GatewayResponse::new(status_code(scope, status)?).with_body(Bytes::from(body.to_string()));
    for (name, value) in headers {
        response
            .headers
            .append(header_name(scope, name)?, header_value(scope, value)?);
    }
    Ok(response)
}

/// Each `authenticate-backend` replaces the `Authorization` header, so a
/// route gets at most one.
fn check_backend_auth(route: &str, inbound: &[Planned<InboundStep>]) -> Result<(), ConfigError> {
    let mut credentials = inbound.iter().filter_map(|planned| match &planned.step {
        InboundStep::AuthenticateBackend { credential } => Some(credential),
        _ => None,
    });
    if let (Some(first), Some(second)) = (credentials.next(), credentials.next()) {
        return Err(ConfigError::RepeatedBackendAuth {
            route: route.to_string(),
            first: first.clone(),
            second: second.clone(),
        });
    }
    Ok(())
}

/// One plan may touch a counter only once, and every step sharing a counter
/// must agree on its quota, otherwise each step would keep re-seeding the
/// other's state.
fn check_counters(plans: &PlanSet) -> Result<(), ConfigError> {
    let mut seen: HashMap<String, Quota> = HashMap::new();
    for plan in plans.values() {
        let mut in_plan = HashSet::new();
        for planned in plan.inbound() {
            let InboundStep::RateLimit { key, quota } = &planned.step else {
                continue;
            };
            let identity = key.identity();
            if !in_plan.insert(identity.clone()) {
                return Err(ConfigError::SharedCounter {
                    route: plan.route().to_string(),
                    key: identity,
                });
            }
            match seen.get(&identity) {
                None => {
                    seen.insert(identity, *quota);
                }
                Some(first) if first == quota => {}
                Some(first) => {
                    return Err(ConfigError::InconsistentQuota {
                        key: identity,
                        first: describe_quota(first),
                        second: describe_quota(quota),
                    });
                }
            }
        }
    }
    Ok(())
}

fn describe_quota(quota: &Quota) -> String {
    format!(
        "{} {}/{}s",
        quota.algorithm(),
        quota.limit(),
        quota.window().as_secs()
    )
}
