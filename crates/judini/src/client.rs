//! Main client implementation.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::Method;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::api::{AgentsApi, ChatApi, DocumentsApi};
use crate::config::{ClientConfig, DEFAULT_BASE_URL, DEFAULT_STREAM_TIMEOUT, DEFAULT_TIMEOUT};
use crate::error::{Error, ErrorResponse, Result};
use crate::transport::{ByteStream, ReqwestTransport, Transport, TransportRequest};

/// Header naming the calling SDK.
pub const SOURCE_HEADER: &str = "source";
/// Value sent in [`SOURCE_HEADER`].
pub const SOURCE_VALUE: &str = "judini-rs";
/// Header naming the integration channel.
pub const CHANNEL_HEADER: &str = "channel";
/// Value sent in [`CHANNEL_HEADER`].
pub const CHANNEL_VALUE: &str = "SDK";
/// Header carrying the organization id.
pub const ORG_HEADER: &str = "CodeGPT-Org-Id";

/// CodeGPT API client.
///
/// Cheap to clone; clones share headers, transport and streaming state.
///
/// # Example
///
/// ```no_run
/// use judini::{CodeGptClient, Message};
///
/// # async fn example() -> judini::Result<()> {
/// let client = CodeGptClient::builder().api_key("secret").build()?;
///
/// let answer = client
///     .chat()
///     .completion("agent-id", vec![Message::user("Hello!")], |delta| print!("{}", delta))
///     .await?;
/// println!("\n{}", answer.text);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct CodeGptClient {
    /// Inner shared state.
    inner: Arc<ClientInner>,
}

/// Inner client state (shared across clones).
pub(crate) struct ClientInner {
    /// HTTP facility.
    pub(crate) transport: Arc<dyn Transport>,
    /// Base URL for API requests.
    pub(crate) base_url: Url,
    /// Headers sent with every request, built once.
    pub(crate) headers: HeaderMap,
    /// Request timeout.
    pub(crate) timeout: Duration,
    /// Streaming timeout.
    pub(crate) stream_timeout: Duration,
    /// Cancellation state for in-flight streams.
    pub(crate) streams: StreamRegistry,
}

impl std::fmt::Debug for CodeGptClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeGptClient")
            .field("base_url", &self.inner.base_url.as_str())
            .field("active_streams", &self.inner.streams.active())
            .finish_non_exhaustive()
    }
}

impl CodeGptClient {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Create a client from a resolved config.
    pub fn from_config(config: ClientConfig) -> Result<Self> {
        Self::builder().config(config).build()
    }

    /// Create a client from `CODEGPT_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_config(ClientConfig::from_env()?)
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    /// Headers sent with every request.
    pub fn headers(&self) -> &HeaderMap {
        &self.inner.headers
    }

    /// Whether any streamed chat call on this client is in flight.
    pub fn is_loading(&self) -> bool {
        self.inner.streams.active() > 0
    }

    /// Cancel every streamed chat call currently in flight on this client.
    ///
    /// Calls started afterwards are unaffected. To cancel a single call, use
    /// the token passed to [`ChatApi::completion_with_token`].
    pub fn stop_streaming(&self) {
        self.inner.streams.cancel_all();
    }

    // ─────────────────────────────────────────────────────────────────────────
    // API accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// Access the chat API.
    pub fn chat(&self) -> ChatApi {
        ChatApi::new(self.clone())
    }

    /// Access the agents API.
    pub fn agents(&self) -> AgentsApi {
        AgentsApi::new(self.clone())
    }

    /// Access the documents API.
    pub fn documents(&self) -> DocumentsApi {
        DocumentsApi::new(self.clone())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internal HTTP methods
    // ─────────────────────────────────────────────────────────────────────────

    pub(crate) fn streams(&self) -> &StreamRegistry {
        &self.inner.streams
    }

    /// Build a URL for an API path.
    pub(crate) fn url(&self, path: &str) -> Result<Url> {
        let path = path.trim_start_matches('/');
        self.inner
            .base_url
            .join(&format!("api/v1/{}", path))
            .map_err(Error::from)
    }

    fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<TransportRequest> {
        Ok(TransportRequest {
            method,
            url: self.url(path)?,
            headers: self.inner.headers.clone(),
            body,
            timeout,
        })
    }

    /// Send a request and return the body of a 2xx response.
    pub(crate) async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<Bytes> {
        let request = self.request(method.clone(), path, body, self.inner.timeout)?;
        tracing::debug!(method = %method, path = %path, "sending request");

        let response = self.inner.transport.send(request).await?;
        if response.is_success() {
            Ok(response.body)
        } else {
            Err(extract_error(&method, path, response.status.as_u16(), &response.body))
        }
    }

    /// Make a GET request.
    pub(crate) async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let body = self.send(Method::GET, path, None).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Make a POST request.
    pub(crate) async fn post<T, B>(&self, path: &str, body: &B) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
        B: serde::Serialize + ?Sized,
    {
        let body = serde_json::to_value(body)?;
        let response = self.send(Method::POST, path, Some(body)).await?;
        Ok(serde_json::from_slice(&response)?)
    }

    /// Make a PATCH request.
    pub(crate) async fn patch<T, B>(&self, path: &str, body: &B) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
        B: serde::Serialize + ?Sized,
    {
        let body = serde_json::to_value(body)?;
        let response = self.send(Method::PATCH, path, Some(body)).await?;
        Ok(serde_json::from_slice(&response)?)
    }

    /// Make a DELETE request, returning the raw body.
    pub(crate) async fn delete(&self, path: &str) -> Result<Bytes> {
        self.send(Method::DELETE, path, None).await
    }

    /// Make a POST request for streaming (returns the body stream directly).
    pub(crate) async fn post_stream<B>(&self, path: &str, body: &B) -> Result<ByteStream>
    where
        B: serde::Serialize + ?Sized,
    {
        let body = serde_json::to_value(body)?;
        let request = self.request(Method::POST, path, Some(body), self.inner.stream_timeout)?;
        tracing::debug!(path = %path, "opening stream");

        let response = self.inner.transport.stream(request).await?;
        if response.status.is_success() {
            return Ok(response.body);
        }

        // Error bodies are small; read what there is for the message.
        let status = response.status.as_u16();
        let mut body = response.body;
        let mut bytes = Vec::new();
        while let Some(Ok(chunk)) = futures::StreamExt::next(&mut body).await {
            bytes.extend_from_slice(&chunk);
        }
        Err(extract_error(&Method::POST, path, status, &bytes))
    }
}

/// Extract an error from a failed response.
fn extract_error(method: &Method, path: &str, status: u16, body: &[u8]) -> Error {
    let message = serde_json::from_slice::<ErrorResponse>(body)
        .ok()
        .and_then(ErrorResponse::into_message)
        .or_else(|| {
            let text = String::from_utf8_lossy(body).trim().to_string();
            (!text.is_empty()).then_some(text)
        });

    tracing::warn!(method = %method, path = %path, status, "request failed");
    Error::api(status, message)
}

// ─────────────────────────────────────────────────────────────────────────────
// Stream registry
// ─────────────────────────────────────────────────────────────────────────────

/// Tracks in-flight streams so they can be cancelled together.
///
/// Every call gets a child of the current parent token. Cancelling the parent
/// stops all of them; a fresh parent is installed for later calls.
pub(crate) struct StreamRegistry {
    parent: Mutex<CancellationToken>,
    active: Arc<AtomicUsize>,
}

impl StreamRegistry {
    fn new() -> Self {
        Self {
            parent: Mutex::new(CancellationToken::new()),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A token cancelled by the next [`cancel_all`](Self::cancel_all).
    pub(crate) fn token(&self) -> CancellationToken {
        self.parent.lock().child_token()
    }

    /// Mark a stream active until the guard is dropped.
    pub(crate) fn begin(&self) -> StreamGuard {
        self.active.fetch_add(1, Ordering::SeqCst);
        StreamGuard {
            active: Arc::clone(&self.active),
        }
    }

    pub(crate) fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    fn cancel_all(&self) {
        let previous = std::mem::replace(&mut *self.parent.lock(), CancellationToken::new());
        tracing::debug!(active = self.active(), "stopping all streams");
        previous.cancel();
    }
}

/// Keeps a stream counted as active.
#[derive(Debug)]
pub(crate) struct StreamGuard {
    active: Arc<AtomicUsize>,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────────────────────────

/// Builder for creating a [`CodeGptClient`].
pub struct ClientBuilder {
    api_key: Option<String>,
    org_id: Option<String>,
    base_url: String,
    timeout: Duration,
    stream_timeout: Duration,
    user_agent: Option<String>,
    transport: Option<Arc<dyn Transport>>,
}

impl std::fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("has_api_key", &self.api_key.is_some())
            .field("org_id", &self.org_id)
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("stream_timeout", &self.stream_timeout)
            .field("custom_transport", &self.transport.is_some())
            .finish()
    }
}

impl ClientBuilder {
    /// Create a new builder with defaults.
    pub fn new() -> Self {
        Self {
            api_key: None,
            org_id: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            stream_timeout: DEFAULT_STREAM_TIMEOUT,
            user_agent: None,
            transport: None,
        }
    }

    /// Take every setting from a config.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.api_key = Some(config.api_key);
        self.org_id = config.org_id;
        self.base_url = config.base_url;
        self.timeout = config.timeout;
        self.stream_timeout = config.stream_timeout;
        self
    }

    /// Set the API key (required).
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the organization id.
    pub fn org_id(mut self, org_id: impl Into<String>) -> Self {
        self.org_id = Some(org_id.into());
        self
    }

    /// Set the base URL for the server.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the streaming request timeout.
    pub fn stream_timeout(mut self, timeout: Duration) -> Self {
        self.stream_timeout = timeout;
        self
    }

    /// Set a custom user agent.
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Use a custom transport instead of `reqwest`.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<CodeGptClient> {
        let api_key = self
            .api_key
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| Error::Config("api_key is required".to_string()))?;

        // Parse and normalize base URL
        let mut base_url = Url::parse(&self.base_url)?;
        if !base_url.path().ends_with('/') {
            base_url.set_path(&format!("{}/", base_url.path()));
        }

        let headers = build_headers(&api_key, self.org_id.as_deref())?;

        let transport = match self.transport {
            Some(transport) => transport,
            None => {
                let user_agent = self
                    .user_agent
                    .unwrap_or_else(|| format!("judini/{}", env!("CARGO_PKG_VERSION")));
                Arc::new(ReqwestTransport::new(&user_agent)?)
            }
        };

        Ok(CodeGptClient {
            inner: Arc::new(ClientInner {
                transport,
                base_url,
                headers,
                timeout: self.timeout,
                stream_timeout: self.stream_timeout,
                streams: StreamRegistry::new(),
            }),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn build_headers(api_key: &str, org_id: Option<&str>) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    let auth = HeaderValue::from_str(&format!("Bearer {}", api_key))
        .map_err(|_| Error::Config("Invalid api key".to_string()))?;
    headers.insert(AUTHORIZATION, auth);

    headers.insert(
        HeaderName::from_static(SOURCE_HEADER),
        HeaderValue::from_static(SOURCE_VALUE),
    );
    headers.insert(
        HeaderName::from_static(CHANNEL_HEADER),
        HeaderValue::from_static(CHANNEL_VALUE),
    );

    if let Some(org_id) = org_id.filter(|o| !o.trim().is_empty()) {
        let value = HeaderValue::from_str(org_id)
            .map_err(|_| Error::Config("Invalid organization id".to_string()))?;
        headers.insert(HeaderName::from_static("codegpt-org-id"), value);
    }

    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> CodeGptClient {
        ClientBuilder::new()
            .api_key("key")
            .base_url("http://localhost:8080")
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_requires_api_key() {
        let result = ClientBuilder::new().build();
        assert!(matches!(result, Err(Error::Config(_))));

        let result = ClientBuilder::new().api_key("   ").build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_builder_rejects_bad_url() {
        let result = ClientBuilder::new().api_key("k").base_url("not a url").build();
        assert!(matches!(result, Err(Error::InvalidUrl(_))));
    }

    #[test]
    fn test_builder_defaults_to_hosted_api() {
        let client = ClientBuilder::new().api_key("k").build().unwrap();
        assert_eq!(client.base_url().as_str(), DEFAULT_BASE_URL);
    }

    #[test]
    fn test_builder_normalizes_trailing_slash() {
        let client = ClientBuilder::new()
            .api_key("k")
            .base_url("http://localhost:8080/")
            .build()
            .unwrap();

        assert_eq!(client.base_url().as_str(), "http://localhost:8080/");
    }

    #[test]
    fn test_url_building() {
        let client = client();

        let url = client.url("agent").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/api/v1/agent");

        let url = client.url("/chat/completions").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/api/v1/chat/completions");
    }

    #[test]
    fn test_headers_without_org() {
        let client = client();
        let headers = client.headers();

        assert_eq!(headers[CONTENT_TYPE], "application/json");
        assert_eq!(headers[AUTHORIZATION], "Bearer key");
        assert_eq!(headers[SOURCE_HEADER], SOURCE_VALUE);
        assert_eq!(headers[CHANNEL_HEADER], CHANNEL_VALUE);
        assert!(!headers.contains_key(ORG_HEADER));
    }

    #[test]
    fn test_headers_with_org() {
        let client = ClientBuilder::new()
            .api_key("key")
            .org_id("org-42")
            .build()
            .unwrap();
        assert_eq!(client.headers()[ORG_HEADER], "org-42");
    }

    #[test]
    fn test_from_config() {
        let config = ClientConfig::new("k")
            .with_org_id("o")
            .with_base_url("http://example.com/root");
        let client = CodeGptClient::from_config(config).unwrap();
        assert_eq!(client.base_url().as_str(), "http://example.com/root/");
        assert_eq!(client.headers()[ORG_HEADER], "o");
    }

    #[test]
    fn test_stream_registry_tracks_and_cancels() {
        let client = client();
        assert!(!client.is_loading());

        let token = client.streams().token();
        let guard = client.streams().begin();
        assert!(client.is_loading());

        client.stop_streaming();
        assert!(token.is_cancelled());

        let fresh = client.streams().token();
        assert!(!fresh.is_cancelled());

        drop(guard);
        assert!(!client.is_loading());
    }

    #[test]
    fn test_extract_error_prefers_server_message() {
        let err = extract_error(&Method::GET, "agent/x", 404, br#"{"message":"Agent not found"}"#);
        match err {
            Error::Api {
                status, message, ..
            } => {
                assert_eq!(status, 404);
                assert_eq!(message.as_deref(), Some("Agent not found"));
            }
            other => panic!("unexpected: {other:?}"),
        }

        let err = extract_error(&Method::GET, "agent", 502, b"");
        assert!(matches!(err, Error::Api { status: 502, message: None, .. }));
    }
}
