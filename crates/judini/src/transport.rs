//! Transport layer.
//!
//! A [`Transport`] performs a single HTTP exchange. It never interprets the
//! status code; mapping non-2xx responses to errors is the client's job so
//! that every operation reports failures the same way.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use url::Url;

use crate::error::{Error, Result};

/// A boxed stream of body chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send + 'static>>;

/// An outbound request.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    /// HTTP method.
    pub method: Method,
    /// Absolute URL.
    pub url: Url,
    /// Headers to send.
    pub headers: HeaderMap,
    /// JSON body, if any.
    pub body: Option<serde_json::Value>,
    /// Per-request timeout.
    pub timeout: Duration,
}

/// A fully buffered response.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    /// Response status.
    pub status: StatusCode,
    /// Raw body bytes.
    pub body: Bytes,
}

impl TransportResponse {
    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// A response whose body is read incrementally.
pub struct StreamingResponse {
    /// Response status.
    pub status: StatusCode,
    /// Body chunks as they arrive.
    pub body: ByteStream,
}

impl std::fmt::Debug for StreamingResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingResponse")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// An HTTP facility able to issue single requests.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and buffer the whole body.
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse>;

    /// Send a request and hand back the body as a chunk stream.
    async fn stream(&self, request: TransportRequest) -> Result<StreamingResponse>;
}

/// [`Transport`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    /// Create a transport with the given user agent.
    pub fn new(user_agent: &str) -> Result<Self> {
        let http = reqwest::Client::builder().user_agent(user_agent).build()?;
        Ok(Self { http })
    }

    /// Wrap an existing `reqwest` client.
    pub fn from_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    fn build(&self, request: TransportRequest) -> reqwest::RequestBuilder {
        let mut builder = self
            .http
            .request(request.method, request.url)
            .headers(request.headers)
            .timeout(request.timeout);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        builder
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse> {
        let response = self.build(request).send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        Ok(TransportResponse { status, body })
    }

    async fn stream(&self, request: TransportRequest) -> Result<StreamingResponse> {
        let response = self.build(request).send().await?;
        let status = response.status();
        let body = response.bytes_stream().map(|chunk| chunk.map_err(Error::from));
        Ok(StreamingResponse {
            status,
            body: Box::pin(body),
        })
    }
}
