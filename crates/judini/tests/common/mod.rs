//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use futures::channel::mpsc;
use judini::{
    CodeGptClient, Error, Result, StreamingResponse, Transport, TransportRequest,
    TransportResponse,
};
use parking_lot::Mutex;
use reqwest::StatusCode;
use wiremock::MockServer;

pub const API_KEY: &str = "test-key";

/// Start a mock server and a client pointed at it.
pub async fn setup() -> (MockServer, CodeGptClient) {
    let server = MockServer::start().await;
    let client = CodeGptClient::builder()
        .api_key(API_KEY)
        .base_url(server.uri())
        .build()
        .expect("client should build");
    (server, client)
}

/// Render records as a `text/event-stream` body.
pub fn sse(records: &[&str]) -> String {
    records
        .iter()
        .map(|record| format!("data: {}\n\n", record))
        .collect()
}

/// A chat-completion style delta record.
pub fn delta(text: &str) -> String {
    serde_json::json!({ "choices": [{ "delta": { "content": text } }] }).to_string()
}

/// A transport whose streaming body is fed by the test.
pub struct ScriptedTransport {
    body: Mutex<Option<mpsc::UnboundedReceiver<Result<Bytes>>>>,
    calls: AtomicUsize,
    last_request: Mutex<Option<TransportRequest>>,
}

/// Handle for pushing body chunks into a [`ScriptedTransport`].
pub struct BodyFeed {
    tx: mpsc::UnboundedSender<Result<Bytes>>,
}

impl BodyFeed {
    pub fn chunk(&self, bytes: impl Into<Bytes>) {
        let _ = self.tx.unbounded_send(Ok(bytes.into()));
    }

    pub fn fail(&self, message: &str) {
        let _ = self.tx.unbounded_send(Err(Error::Stream(message.to_string())));
    }

    /// End the body.
    pub fn close(self) {
        self.tx.close_channel();
    }
}

impl ScriptedTransport {
    pub fn new() -> (Arc<Self>, BodyFeed) {
        let (tx, rx) = mpsc::unbounded();
        let transport = Arc::new(Self {
            body: Mutex::new(Some(rx)),
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        });
        (transport, BodyFeed { tx })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<TransportRequest> {
        self.last_request.lock().clone()
    }

    fn record(&self, request: TransportRequest) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock() = Some(request);
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse> {
        self.record(request);
        Ok(TransportResponse {
            status: StatusCode::OK,
            body: Bytes::from_static(b"[]"),
        })
    }

    async fn stream(&self, request: TransportRequest) -> Result<StreamingResponse> {
        self.record(request);
        let rx = self
            .body
            .lock()
            .take()
            .ok_or_else(|| Error::Stream("body already taken".to_string()))?;
        Ok(StreamingResponse {
            status: StatusCode::OK,
            body: Box::pin(rx),
        })
    }
}

/// Client wired to a scripted transport.
pub fn scripted_client() -> (CodeGptClient, Arc<ScriptedTransport>, BodyFeed) {
    let (transport, feed) = ScriptedTransport::new();
    let client = CodeGptClient::builder()
        .api_key(API_KEY)
        .base_url("http://scripted.test")
        .transport(transport.clone())
        .build()
        .expect("client should build");
    (client, transport, feed)
}

/// A transport that never produces response headers.
pub struct StalledTransport;

#[async_trait]
impl Transport for StalledTransport {
    async fn send(&self, _request: TransportRequest) -> Result<TransportResponse> {
        futures::future::pending().await
    }

    async fn stream(&self, _request: TransportRequest) -> Result<StreamingResponse> {
        futures::future::pending().await
    }
}

/// Client whose requests wait forever for the server.
pub fn stalled_client() -> CodeGptClient {
    CodeGptClient::builder()
        .api_key(API_KEY)
        .base_url("http://stalled.test")
        .transport(Arc::new(StalledTransport))
        .build()
        .expect("client should build")
}
