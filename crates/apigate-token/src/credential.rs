//! Client credentials
//!
//! A credential contributes the proof-of-identity fields of the token
//! request: either a shared secret or a freshly signed client assertion.

use crate::error::TokenError;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// `client_assertion_type` for JWT bearer assertions
pub const JWT_BEARER_ASSERTION_TYPE: &str =
    "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// Default assertion validity
pub const DEFAULT_ASSERTION_LIFETIME: Duration = Duration::from_secs(600);

/// Secret string that never appears in debug output
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    /// Wrap a secret value
    #[inline]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Raw secret value
    #[inline]
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(****)")
    }
}

/// RSA signature scheme for client assertions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SigningAlgorithm {
    /// RSASSA-PKCS1-v1_5 with SHA-256
    #[serde(rename = "RS256")]
    Rs256,
    /// RSASSA-PSS with SHA-256
    #[default]
    #[serde(rename = "PS256")]
    Ps256,
}

impl From<SigningAlgorithm> for Algorithm {
    fn from(value: SigningAlgorithm) -> Self {
        match value {
            SigningAlgorithm::Rs256 => Algorithm::RS256,
            SigningAlgorithm::Ps256 => Algorithm::PS256,
        }
    }
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    sub: &'a str,
    aud: &'a str,
    exp: i64,
    nbf: i64,
    iat: i64,
    jti: String,
}

/// Signs client assertions with a certificate's private key
#[derive(Clone)]
pub struct AssertionSigner {
    key: EncodingKey,
    thumbprint: String,
    algorithm: SigningAlgorithm,
    lifetime: Duration,
}

impl AssertionSigner {
    /// Build from a PEM RSA private key (PKCS#1 or PKCS#8) and the matching
    /// PEM certificate
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Credential`] when either PEM block is unusable.
    pub fn from_pem(
        key_pem: &[u8],
        cert_pem: &[u8],
        algorithm: SigningAlgorithm,
    ) -> Result<Self, TokenError> {
        let key = EncodingKey::from_rsa_pem(key_pem)
            .map_err(|err| TokenError::Credential(format!("private key: {err}")))?;
        let cert = pem::parse(cert_pem)
            .map_err(|err| TokenError::Credential(format!("certificate: {err}")))?;
        if cert.tag() != "CERTIFICATE" {
            return Err(TokenError::Credential(format!(
                "expected CERTIFICATE block, found {}",
                cert.tag()
            )));
        }

        Ok(Self {
            key,
            thumbprint: certificate_thumbprint(cert.contents()),
            algorithm,
            lifetime: DEFAULT_ASSERTION_LIFETIME,
        })
    }

    /// Build from PEM files on disk
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Credential`] when a file cannot be read or parsed.
    pub fn from_files(
        key_path: impl AsRef<Path>,
        cert_path: impl AsRef<Path>,
        algorithm: SigningAlgorithm,
    ) -> Result<Self, TokenError> {
        let read = |path: &Path| {
            std::fs::read(path)
                .map_err(|err| TokenError::Credential(format!("{}: {err}", path.display())))
        };
        let key = read(key_path.as_ref())?;
        let cert = read(cert_path.as_ref())?;
        Self::from_pem(&key, &cert, algorithm)
    }

    /// With assertion validity window
    #[inline]
    #[must_use]
    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// `x5t#S256` value: base64url SHA-256 of the certificate DER
    #[inline]
    #[must_use]
    pub fn thumbprint(&self) -> &str {
        &self.thumbprint
    }

    /// Signature scheme
    #[inline]
    #[must_use]
    pub fn algorithm(&self) -> SigningAlgorithm {
        self.algorithm
    }

    /// Sign a new assertion for `client_id` addressed to `audience`
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Signing`] if the JWT cannot be encoded.
    pub fn sign(&self, client_id: &str, audience: &str) -> Result<String, TokenError> {
        let mut header = Header::new(self.algorithm.into());
        header.x5t_s256 = Some(self.thumbprint.clone());

        let now = chrono::Utc::now().timestamp();
        let lifetime = i64::try_from(self.lifetime.as_secs()).unwrap_or(i64::MAX);
        let claims = AssertionClaims {
            iss: client_id,
            sub: client_id,
            aud: audience,
            exp: now.saturating_add(lifetime),
            nbf: now,
            iat: now,
            jti: uuid::Uuid::new_v4().to_string(),
        };

        jsonwebtoken::encode(&header, &claims, &self.key)
            .map_err(|err| TokenError::Signing(err.to_string()))
    }
}

impl fmt::Debug for AssertionSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssertionSigner")
            .field("thumbprint", &self.thumbprint)
            .field("algorithm", &self.algorithm)
            .field("lifetime", &self.lifetime)
            .finish_non_exhaustive()
    }
}

/// base64url (unpadded) SHA-256 digest of DER bytes
#[must_use]
pub fn certificate_thumbprint(der: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(der))
}

/// Proof of client identity
#[derive(Debug, Clone)]
pub enum Credential {
    /// `client_secret` form field
    SharedSecret(Secret),
    /// Signed `client_assertion` JWT
    SignedAssertion(AssertionSigner),
}

impl Credential {
    /// Shared-secret credential
    #[inline]
    pub fn shared_secret(secret: impl Into<String>) -> Self {
        Self::SharedSecret(Secret::new(secret))
    }

    /// Form fields proving identity for one token request
    ///
    /// # Errors
    ///
    /// Fails when an assertion cannot be signed.
    pub fn form_fields(
        &self,
        client_id: &str,
        endpoint: &str,
    ) -> Result<Vec<(&'static str, String)>, TokenError> {
        match self {
            Self::SharedSecret(secret) => Ok(vec![("client_secret", secret.expose().to_string())]),
            Self::SignedAssertion(signer) => Ok(vec![
                (
                    "client_assertion_type",
                    JWT_BEARER_ASSERTION_TYPE.to_string(),
                ),
                ("client_assertion", signer.sign(client_id, endpoint)?),
            ]),
        }
    }
}
