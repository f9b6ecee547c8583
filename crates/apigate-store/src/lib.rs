//! apigate Store - keyed state for the policy pipeline
//!
//! Two stores back the stateful policies:
//! - [`CounterStore`]: per-key atomic read-modify-write with an idle TTL,
//!   used by rate limiting
//! - [`TtlCache`]: a concurrent value cache with single-flight population,
//!   used for backend tokens and memoized responses
//!
//! Both are plain values meant to be injected (usually behind an `Arc`),
//! never process-wide singletons.

#![warn(unreachable_pub)]
#![warn(missing_docs)]

pub mod cache;
pub mod counter;
pub mod error;

pub use cache::TtlCache;
pub use counter::CounterStore;
pub use error::StoreError;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
