//! Request and response values flowing through the pipeline

use bytes::Bytes;
use http::header::{HeaderMap, HeaderValue, IntoHeaderName};
use http::{Method, StatusCode};

/// Inbound request as seen by the pipeline
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    /// HTTP method
    pub method: Method,
    /// Route (scope id) selecting the execution plan
    pub route: String,
    /// Path forwarded to the backend
    pub path: String,
    /// Raw query string, without `?`
    pub query: Option<String>,
    /// Request headers
    pub headers: HeaderMap,
    /// Request body
    pub body: Bytes,
}

impl GatewayRequest {
    /// Create request for `route` with path `/`
    pub fn new(method: Method, route: impl Into<String>) -> Self {
        Self {
            method,
            route: route.into(),
            path: "/".to_string(),
            query: None,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// `GET` request for `route`
    #[inline]
    pub fn get(route: impl Into<String>) -> Self {
        Self::new(Method::GET, route)
    }

    /// With path
    #[inline]
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// With query string
    #[inline]
    #[must_use]
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    /// With header, replacing existing values
    #[inline]
    #[must_use]
    pub fn with_header<K: IntoHeaderName>(mut self, name: K, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// With body
    #[inline]
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Header value as text
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Response produced by the backend or by a policy step
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayResponse {
    /// Status code
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Response body
    pub body: Bytes,
}

impl GatewayResponse {
    /// Empty response with `status`
    #[must_use]
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// With header, replacing existing values
    #[inline]
    #[must_use]
    pub fn with_header<K: IntoHeaderName>(mut self, name: K, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// With body
    #[inline]
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Header value as text
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Body as UTF-8, lossy
    #[must_use]
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}
