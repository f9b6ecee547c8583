//! apigate Core - policy pipeline orchestrator
//!
//! Applies an ordered, hierarchically scoped sequence of policy steps to
//! every request and response:
//! - Loads a YAML or TOML [`GatewayConfig`] describing the scope tree
//!   (Global → Workspace → Product → Api → Operation)
//! - Flattens the tree once into per-route [`ExecutionPlan`]s
//! - Runs plans through the [`Pipeline`]: subscription validation, rate
//!   limiting, backend credentials, response caching, status mapping,
//!   error normalization and header sanitization
//!
//! # Example
//!
//! ```rust,ignore
//! use apigate_core::{Gateway, GatewayConfig, GatewayRequest};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = GatewayConfig::load("gateway.yaml")?;
//! let gateway = Gateway::from_config(config)?;
//!
//! let request = GatewayRequest::get("get-order").with_path("/orders/42");
//! let response = gateway.process(request).await;
//! println!("{}", response.status);
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![warn(missing_docs)]

pub mod backend;
pub mod config;
pub mod context;
pub mod error;
pub mod gateway;
pub mod message;
pub mod memo;
pub mod pipeline;
pub mod plan;
pub mod scope;

pub use backend::{Backend, HttpBackend, StaticBackend};
pub use config::{
    BackendConfig, CertificateConfig, CredentialConfig, GatewayConfig, ScopeConfig, Settings,
    StepConfig, SubscriptionConfig, DEFAULT_SUBSCRIPTION_HEADER,
};
pub use context::{BackendToken, RequestContext};
pub use error::{BackendError, ConfigError, GatewayError};
pub use gateway::{Gateway, GatewayBuilder};
pub use message::{GatewayRequest, GatewayResponse};
pub use memo::{ResponseCache, MAX_CACHE_TTL};
pub use pipeline::{Flow, Pipeline};
pub use plan::{
    ExecutionPlan, InboundStep, LimitKey, OutboundStep, Phase, PlanCompiler, PlanDescription,
    PlanSet, Planned, StepDescription,
};
pub use scope::ScopeLevel;

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for embedding the gateway
    pub use crate::{
        Backend, Gateway, GatewayConfig, GatewayError, GatewayRequest, GatewayResponse,
        StaticBackend,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
