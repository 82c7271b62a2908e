//! HTTP transport boundary
//!
//! The scheduler only ever talks to a [`Transport`]. Status evaluation is the
//! scheduler's job, so implementations must hand back non-2xx responses as
//! regular [`RawResponse`] values instead of errors.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::request::{HeaderList, QueryList};

/// Errors produced by a transport
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    /// Could not connect to the remote host
    #[error("Connection failed: {0}")]
    Connect(String),

    /// No response within the configured timeout
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Any other failure before a response arrived
    #[error("Request failed: {0}")]
    Request(String),

    /// The transport treated the response itself as an error
    #[error("HTTP error response with status {}", .0.status)]
    Response(RawResponse),
}

/// Fully encoded request, ready to go on the wire
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRequest {
    /// Request id, for logging
    pub id: String,
    /// Uppercase HTTP method
    pub method: String,
    /// Absolute url, or a path joined onto the transport's base url
    pub uri: String,
    /// Headers in submission order
    pub headers: HeaderList,
    /// Query parameters in submission order
    pub query: QueryList,
    /// Encoded body
    pub body: Option<Bytes>,
}

/// Response as received from the wire
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers as received
    pub headers: HeaderList,
    /// Undecoded body
    pub body: Bytes,
}

impl RawResponse {
    /// Response with a status and body and no headers
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// Append a header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Something that can perform HTTP calls concurrently
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue one request and wait for it to settle
    async fn dispatch(&self, request: &PreparedRequest) -> Result<RawResponse, TransportError>;
}

/// Settings for [`ReqwestTransport`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Prefix for relative request uris
    pub base_url: Option<String>,

    /// Whole-request timeout in milliseconds
    pub timeout_ms: Option<u64>,

    /// Connect timeout in milliseconds
    pub connect_timeout_ms: Option<u64>,

    /// User-Agent header sent with every request
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_ms: Some(30_000),
            connect_timeout_ms: Some(10_000),
            user_agent: concat!("batchflow/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl TransportConfig {
    /// Set the base url
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Set the request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    fn url_for(&self, uri: &str) -> String {
        match &self.base_url {
            Some(base) if !uri.contains("://") => {
                format!("{}/{}", base.trim_end_matches('/'), uri.trim_start_matches('/'))
            }
            _ => uri.to_string(),
        }
    }
}

/// [`Transport`] backed by a shared `reqwest::Client`
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    config: TransportConfig,
}

impl ReqwestTransport {
    /// Build a transport with its own connection pool
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder().user_agent(config.user_agent.clone());
        if let Some(ms) = config.timeout_ms {
            builder = builder.timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = config.connect_timeout_ms {
            builder = builder.connect_timeout(Duration::from_millis(ms));
        }
        let client = builder
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))?;

        Ok(Self { client, config })
    }

    /// Reuse an existing client
    pub fn with_client(client: reqwest::Client, config: TransportConfig) -> Self {
        Self { client, config }
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(err.to_string())
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Request(err.to_string())
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    #[instrument(skip(self, request), fields(request_id = %request.id, method = %request.method))]
    async fn dispatch(&self, request: &PreparedRequest) -> Result<RawResponse, TransportError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|_| TransportError::Request(format!("Invalid method: {}", request.method)))?;
        let url = self.config.url_for(&request.uri);

        let mut builder = self.client.request(method, &url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await.map_err(map_reqwest_error)?;

        debug!(status, bytes = body.len(), "Response received");
        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_uri_joined_with_base() {
        let config = TransportConfig::default().with_base_url("http://api.local/v1/");
        assert_eq!(config.url_for("/users"), "http://api.local/v1/users");
        assert_eq!(config.url_for("https://other.host/x"), "https://other.host/x");
    }

    #[test]
    fn test_transport_builds_with_defaults() {
        let transport = ReqwestTransport::new(TransportConfig::default());
        assert!(transport.is_ok());
    }

    /// Serve one canned HTTP response on a random local port
    async fn serve_once(response: &'static str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_non_success_status_is_a_response() {
        let base = serve_once(
            "HTTP/1.1 404 Not Found\r\nContent-Type: application/json\r\nContent-Length: 21\r\nConnection: close\r\n\r\n{\"error\":\"not found\"}",
        )
        .await;
        let transport =
            ReqwestTransport::new(TransportConfig::default().with_base_url(base)).unwrap();
        let request = PreparedRequest {
            id: "missing".to_string(),
            method: "GET".to_string(),
            uri: "/users/42".to_string(),
            headers: vec![("Accept".to_string(), "application/json".to_string())],
            query: vec![("verbose".to_string(), "true".to_string())],
            body: None,
        };

        let response = transport
            .dispatch(&request)
            .await
            .expect("A 404 must come back as a response");

        assert_eq!(response.status, 404);
        assert_eq!(&response.body[..], br#"{"error":"not found"}"#);
        assert!(response
            .headers
            .iter()
            .any(|(name, value)| name == "content-type" && value == "application/json"));
    }

    #[tokio::test]
    async fn test_refused_connection_is_a_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = ReqwestTransport::new(TransportConfig::default()).unwrap();
        let request = PreparedRequest {
            id: "down".to_string(),
            method: "GET".to_string(),
            uri: format!("http://{}/", addr),
            headers: Vec::new(),
            query: Vec::new(),
            body: None,
        };

        let err = transport.dispatch(&request).await.unwrap_err();
        assert!(!matches!(err, TransportError::Response(_)));
    }

    #[test]
    fn test_error_response_display() {
        let err = TransportError::Response(RawResponse::new(503, "down"));
        assert_eq!(err.to_string(), "HTTP error response with status 503");
    }
}
