//! HTTP client boundary
//!
//! The rotating transport never opens sockets itself. It hands every attempt to
//! an [`HttpClient`] together with the per-attempt [`RequestOptions`].

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::{Method, Response};
use std::time::Duration;

use crate::error::TransportError;

/// Options for a single attempt
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Upper bound for establishing the connection (proxy handshake included)
    pub connect_timeout: Option<Duration>,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    /// Proxy to route through, `[scheme://][user:pass@]host:port`
    pub proxy: Option<String>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }
}

/// Executes one HTTP request attempt
///
/// Implementations report failures through [`TransportError`] so the caller
/// can tell connection problems, error statuses and protocol failures apart.
/// Responses with a status of 400 or above must be reported as
/// [`TransportError::Status`].
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(
        &self,
        method: &Method,
        url: &str,
        options: &RequestOptions,
    ) -> Result<Response<Bytes>, TransportError>;
}

#[async_trait]
impl<T: HttpClient + ?Sized> HttpClient for std::sync::Arc<T> {
    async fn execute(
        &self,
        method: &Method,
        url: &str,
        options: &RequestOptions,
    ) -> Result<Response<Bytes>, TransportError> {
        (**self).execute(method, url, options).await
    }
}
