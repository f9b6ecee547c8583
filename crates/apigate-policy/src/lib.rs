//! apigate Policy - stateless response policies
//!
//! - [`normalize`]: collapse backend error statuses into a small public set,
//!   clearing error bodies so internal detail never reaches clients
//! - [`sanitize`]: strip response headers by allowlist or blocklist while
//!   leaving protocol-critical headers alone
//!
//! Both are pure functions of their inputs; the orchestrator decides when
//! they run.

#![warn(unreachable_pub)]
#![warn(missing_docs)]

pub mod error;
pub mod normalize;
pub mod sanitize;

pub use error::SanitizeError;
pub use normalize::{normalize, BodyAction, ErrorMapping, Normalized, StatusRewrite};
pub use sanitize::{HeaderPolicy, SanitizeMode, PROTECTED_HEADERS};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
