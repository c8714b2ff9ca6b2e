//! hyper-based [`HttpClient`]

use async_trait::async_trait;
use bytes::Bytes;
use http::header::HOST;
use http::{Method, Request, Response};
use http_body_util::{BodyExt, Full};
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::egress;
use super::transport::{HttpClient, RequestOptions};
use crate::error::TransportError;
use crate::models::ProxyEndpoint;

/// One HTTP/1.1 connection per attempt, tunnelled through the attempt's proxy
///
/// Only plain `http://` targets are supported.
#[derive(Debug, Clone, Default)]
pub struct HyperClient {
    request_timeout: Option<Duration>,
}

impl HyperClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound sending the request and reading the whole response
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    async fn send(
        &self,
        request: Request<Full<Bytes>>,
        stream: tokio::net::TcpStream,
    ) -> Result<Response<Bytes>, TransportError> {
        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| TransportError::protocol(format!("Handshake failed: {}", e)))?;

        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!("Connection ended: {}", e);
            }
        });

        let response = sender
            .send_request(request)
            .await
            .map_err(|e| TransportError::protocol(format!("Request failed: {}", e)))?;

        let (parts, body) = response.into_parts();
        let body_bytes = body
            .collect()
            .await
            .map_err(|e| TransportError::protocol(format!("Failed to read response: {}", e)))?
            .to_bytes();

        Ok(Response::from_parts(parts, body_bytes))
    }
}

#[async_trait]
impl HttpClient for HyperClient {
    async fn execute(
        &self,
        method: &Method,
        url: &str,
        options: &RequestOptions,
    ) -> Result<Response<Bytes>, TransportError> {
        let target = Url::parse(url)
            .map_err(|e| TransportError::protocol(format!("Invalid URL {}: {}", url, e)))?;
        if target.scheme() != "http" {
            return Err(TransportError::protocol(format!(
                "Unsupported protocol {}",
                target.scheme()
            )));
        }
        let host = target
            .host_str()
            .ok_or_else(|| TransportError::protocol(format!("No host in URL {}", url)))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        let port = target.port_or_known_default().unwrap_or(80);

        let proxy = match options.proxy.as_deref() {
            Some(raw) => Some(ProxyEndpoint::parse(raw).map_err(|_| {
                TransportError::protocol(format!("Could not resolve proxy: {}", raw))
            })?),
            None => None,
        };

        let stream = egress::connect(proxy.as_ref(), host, port, options.connect_timeout).await?;

        let path = match target.query() {
            Some(query) => format!("{}?{}", target.path(), query),
            None => target.path().to_string(),
        };
        let authority = match target.port() {
            Some(port) => format!("{}:{}", target.host_str().unwrap_or(host), port),
            None => target.host_str().unwrap_or(host).to_string(),
        };

        let mut builder = Request::builder()
            .method(method.clone())
            .uri(path)
            .header(HOST, authority);
        for (name, value) in &options.headers {
            builder = builder.header(name, value);
        }
        let request = builder
            .body(Full::new(options.body.clone().unwrap_or_default()))
            .map_err(|e| TransportError::protocol(format!("Failed to build request: {}", e)))?;

        let response = match self.request_timeout {
            Some(limit) => tokio::time::timeout(limit, self.send(request, stream))
                .await
                .map_err(|_| {
                    TransportError::connect(format!(
                        "Operation timed out after {} milliseconds",
                        limit.as_millis()
                    ))
                })??,
            None => self.send(request, stream).await?,
        };

        let status = response.status();
        if status.as_u16() >= 400 {
            return Err(TransportError::status(
                status.as_u16(),
                status.canonical_reason().unwrap_or("HTTP error"),
            ));
        }

        Ok(response)
    }
}
