//! HTTP client SDK for the CodeGPT agent platform.
//!
//! This crate provides a typed client for managing agents and documents and
//! for streaming chat completions from an agent.
//!
//! # Example
//!
//! ```no_run
//! use judini::{CodeGptClient, Message, Result};
//!
//! # async fn example() -> Result<()> {
//! // Reads CODEGPT_API_KEY and, optionally, CODEGPT_ORG_ID / CODEGPT_API_URL
//! let client = CodeGptClient::from_env()?;
//!
//! // List agents
//! for agent in client.agents().list().await? {
//!     println!("{} {:?}", agent.id, agent.name);
//! }
//!
//! // Stream a completion, printing text as it arrives
//! let outcome = client
//!     .chat()
//!     .completion("agent-id", vec![Message::user("Hello!")], |delta| print!("{}", delta))
//!     .await?;
//! println!("\n[{:?}] {}", outcome.status, outcome.text);
//!
//! // Or consume the deltas as a stream
//! use futures::StreamExt;
//! let mut stream = client.chat().stream("agent-id", vec![Message::user("Hi")]).await?;
//! while let Some(delta) = stream.next().await {
//!     print!("{}", delta?);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Errors
//!
//! Bad input is rejected with [`Error::Validation`] before any request is
//! sent, and non-2xx responses become [`Error::Api`]. A chat stream that
//! breaks off after it started is *not* an error: the text received so far
//! is returned with a trailing diagnostic and [`StreamStatus::Failed`].
//!
//! # Cancellation
//!
//! Every streamed call has its own [`CancellationToken`]; see
//! [`ChatApi::completion_with_token`]. [`CodeGptClient::stop_streaming`]
//! cancels all calls in flight on a client, including ones still waiting
//! for response headers, and
//! [`CodeGptClient::is_loading`] reports whether any are running.

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod stream;
pub mod transport;
pub mod types;

pub use api::{AgentsApi, ChatApi, DocumentsApi, TextStream};
pub use client::{ClientBuilder, CodeGptClient};
pub use config::ClientConfig;
pub use error::{DOCS_URL, Error, Result};
pub use stream::{ChatOutcome, StreamStatus};
pub use tokio_util::sync::CancellationToken;
pub use transport::{
    ByteStream, ReqwestTransport, StreamingResponse, Transport, TransportRequest,
    TransportResponse,
};
pub use types::*;
