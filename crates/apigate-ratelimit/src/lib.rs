//! apigate Rate Limiting
//!
//! Admission control over keyed counters:
//! - [`Quota`]: limit, renewal window and [`Algorithm`]
//! - [`CounterKey`]: per-client `(scope, subscription)` or per-resource keys
//! - [`RateLimiter::check_and_increment`]: one indivisible admit-or-reject
//! - [`RateLimitHeaders`] / [`QuotaReport`]: the client-facing quota contract
//!
//! Counter state sits behind the [`CounterBackend`] seam. The default
//! [`InMemoryCounters`] is exact within one process; nothing here attempts
//! cross-instance coordination.
//!
//! # Example
//!
//! ```rust,ignore
//! use apigate_ratelimit::{CounterKey, Quota, RateLimiter};
//! use std::time::Duration;
//!
//! let limiter = RateLimiter::in_memory();
//! let quota = Quota::fixed_window(10, Duration::from_secs(30))?;
//! let key = CounterKey::per_client("orders-api", "sub-1");
//! let decision = limiter.check_and_increment(&key, &quota).await?;
//! assert!(decision.is_allowed());
//! ```

#![warn(unreachable_pub)]
#![warn(missing_docs)]

pub mod backend;
pub mod error;
pub mod headers;
pub mod key;
pub mod limiter;
pub mod quota;
mod window;

pub use backend::{CounterBackend, InMemoryCounters};
pub use error::RateLimitError;
pub use headers::{QuotaReport, RateLimitHeaders};
pub use key::CounterKey;
pub use limiter::{Decision, RateLimiter};
pub use quota::{Algorithm, Quota, MAX_WINDOW};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
