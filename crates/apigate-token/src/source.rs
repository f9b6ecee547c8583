//! Token sources

use crate::credential::Credential;
use crate::error::TokenError;
use url::Url;

/// Everything needed to request one kind of token
#[derive(Debug, Clone)]
pub struct TokenSource {
    name: String,
    endpoint: Url,
    client_id: String,
    scope: String,
    credential: Credential,
}

impl TokenSource {
    /// Create source
    pub fn new(
        name: impl Into<String>,
        endpoint: Url,
        client_id: impl Into<String>,
        scope: impl Into<String>,
        credential: Credential,
    ) -> Self {
        Self {
            name: name.into(),
            endpoint,
            client_id: client_id.into(),
            scope: scope.into(),
            credential,
        }
    }

    /// Credential name this source is registered under
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Token endpoint
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// OAuth2 client id
    #[inline]
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Requested scope
    #[inline]
    #[must_use]
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Cache key identifying the token's purpose: `name|scope`
    #[must_use]
    pub fn cache_key(&self) -> String {
        format!("{}|{}", self.name, self.scope)
    }

    /// Form body for a client-credentials request. Assertions are signed
    /// fresh on every call.
    ///
    /// # Errors
    ///
    /// Fails when the credential cannot produce its fields.
    pub fn form(&self) -> Result<Vec<(&'static str, String)>, TokenError> {
        let mut form = vec![
            ("grant_type", "client_credentials".to_string()),
            ("client_id", self.client_id.clone()),
            ("scope", self.scope.clone()),
        ];
        form.extend(
            self.credential
                .form_fields(&self.client_id, self.endpoint.as_str())?,
        );
        Ok(form)
    }
}
