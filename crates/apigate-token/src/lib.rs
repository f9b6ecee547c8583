//! apigate Token - backend credential acquisition
//!
//! Obtains OAuth2 client-credentials bearer tokens for protected backends
//! and keeps them cached until 95% of their reported lifetime has passed.
//!
//! Lifecycle per cache key: no token, acquiring, cached, then back to no
//! token on expiry or after [`TokenProvider::invalidate_bearer`] (used when
//! a backend answers 401/403 to the token that is still cached).
//!
//! Two credential flows are supported:
//! - shared secret: `client_secret` in the form body
//! - signed assertion: an RS256/PS256 JWT carrying the certificate's
//!   SHA-256 thumbprint, sent as `client_assertion`
//!
//! # Example
//!
//! ```rust,ignore
//! use apigate_token::{Credential, HttpTokenTransport, TokenProvider, TokenSource};
//! use std::sync::Arc;
//!
//! let transport = Arc::new(HttpTokenTransport::with_default_timeout()?);
//! let source = TokenSource::new(
//!     "orders-backend",
//!     "https://login.example.com/tenant/oauth2/v2.0/token".parse()?,
//!     "client-id",
//!     "api://orders/.default",
//!     Credential::shared_secret("s3cret"),
//! );
//! let provider = TokenProvider::new(transport).with_source(source);
//! let token = provider.token("orders-backend").await?;
//! println!("Bearer {}", token.bearer());
//! ```

#![warn(unreachable_pub)]
#![warn(missing_docs)]

pub mod cache;
pub mod credential;
pub mod error;
pub mod provider;
pub mod response;
pub mod retry;
pub mod source;
pub mod transport;

pub use cache::{CachedToken, TokenCache};
pub use credential::{AssertionSigner, Credential, Secret, SigningAlgorithm};
pub use error::TokenError;
pub use provider::TokenProvider;
pub use response::AccessToken;
pub use retry::RetryPolicy;
pub use source::TokenSource;
pub use transport::{HttpTokenTransport, TokenTransport, TransportResponse};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
