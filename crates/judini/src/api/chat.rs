//! Chat API.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio_util::sync::CancellationToken;

use crate::api::require_id;
use crate::client::{CodeGptClient, StreamGuard};
use crate::error::{Error, Result};
use crate::stream::{ChatOutcome, StreamingSession, delta_stream, reassemble};
use crate::types::{ChatCompletionRequest, Message};

const COMPLETIONS_PATH: &str = "chat/completions";

/// Chat API client.
pub struct ChatApi {
    client: CodeGptClient,
}

impl ChatApi {
    pub(crate) fn new(client: CodeGptClient) -> Self {
        Self { client }
    }

    /// A token that cancels one call, and is also cancelled by
    /// [`CodeGptClient::stop_streaming`].
    pub fn cancellation_token(&self) -> CancellationToken {
        self.client.streams().token()
    }

    /// Stream a completion from an agent, calling `on_delta` for each piece
    /// of text as it arrives.
    ///
    /// Returns once the stream completes, is cancelled, or breaks off. A
    /// broken stream is not an `Err`: see [`ChatOutcome`].
    pub async fn completion<F>(
        &self,
        agent_id: &str,
        messages: Vec<Message>,
        on_delta: F,
    ) -> Result<ChatOutcome>
    where
        F: FnMut(&str),
    {
        let token = self.cancellation_token();
        self.completion_with_token(agent_id, messages, token, on_delta)
            .await
    }

    /// Like [`completion`](Self::completion), but cancellable through `token`.
    ///
    /// [`CodeGptClient::stop_streaming`] still stops the call, whatever
    /// token is passed.
    pub async fn completion_with_token<F>(
        &self,
        agent_id: &str,
        messages: Vec<Message>,
        token: CancellationToken,
        on_delta: F,
    ) -> Result<ChatOutcome>
    where
        F: FnMut(&str),
    {
        let request = validated_request(agent_id, messages)?;
        let scope = self.client.streams().token();
        let _guard = self.client.streams().begin();

        let call = async {
            let body = tokio::select! {
                biased;
                _ = scope.cancelled() => return Ok(cancelled_outcome()),
                body = self.client.post_stream(COMPLETIONS_PATH, &request) => body?,
            };
            Ok::<_, Error>(reassemble(body, scope.clone(), on_delta).await)
        };
        let outcome = relay_cancel(&token, &scope, call).await?;

        tracing::debug!(
            agent_id = %request.agent_id,
            status = ?outcome.status,
            deltas = outcome.deltas,
            "chat completion finished"
        );
        Ok(outcome)
    }

    /// Stream a completion as a lazy sequence of text deltas.
    ///
    /// Dropping the stream or calling [`TextStream::cancel`] stops reading.
    pub async fn stream(&self, agent_id: &str, messages: Vec<Message>) -> Result<TextStream> {
        let request = validated_request(agent_id, messages)?;
        let token = self.cancellation_token();
        let guard = self.client.streams().begin();

        let body = tokio::select! {
            biased;
            _ = token.cancelled() => {
                return Ok(TextStream {
                    inner: Box::pin(futures::stream::empty::<Result<String>>()),
                    token: token.clone(),
                    guard: None,
                });
            }
            body = self.client.post_stream(COMPLETIONS_PATH, &request) => body?,
        };

        Ok(TextStream {
            inner: Box::pin(delta_stream(body, token.clone())),
            token,
            guard: Some(guard),
        })
    }
}

fn validated_request(agent_id: &str, messages: Vec<Message>) -> Result<ChatCompletionRequest> {
    require_id("agent id", agent_id)?;
    if messages.is_empty() {
        return Err(Error::Validation("messages must not be empty".to_string()));
    }
    Ok(ChatCompletionRequest::new(agent_id, messages))
}

/// Drive `call` to completion, cancelling `scope` if `caller` fires first.
async fn relay_cancel<F: Future>(
    caller: &CancellationToken,
    scope: &CancellationToken,
    call: F,
) -> F::Output {
    tokio::pin!(call);
    tokio::select! {
        biased;
        _ = caller.cancelled() => scope.cancel(),
        output = &mut call => return output,
    }
    call.await
}

fn cancelled_outcome() -> ChatOutcome {
    let mut session = StreamingSession::new();
    session.cancel();
    session.into_outcome()
}

/// Lazy sequence of text deltas from a chat completion.
pub struct TextStream {
    inner: Pin<Box<dyn Stream<Item = Result<String>> + Send>>,
    token: CancellationToken,
    guard: Option<StreamGuard>,
}

impl TextStream {
    /// Stop reading; the stream ends at the next poll.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// The token controlling this stream.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl std::fmt::Debug for TextStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextStream")
            .field("cancelled", &self.token.is_cancelled())
            .field("finished", &self.guard.is_none())
            .finish()
    }
}

impl Stream for TextStream {
    type Item = Result<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let poll = self.inner.as_mut().poll_next(cx);
        if let Poll::Ready(None) = poll {
            self.guard.take();
        }
        poll
    }
}
