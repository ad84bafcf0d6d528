//! Streamed chat completion reassembly.
//!
//! The chat endpoint answers with blank-line separated records, each usually
//! prefixed with `data: ` and carrying a JSON payload. Network chunks do not
//! line up with records or even with UTF-8 code points, so decoding and
//! record splitting both buffer across chunks:
//!
//! ```text
//! bytes ──▶ Utf8Decoder ──▶ RecordSplitter ──▶ parse_block ──▶ Record
//! ```
//!
//! [`StreamingSession`] ties these together with the accumulator and the
//! terminal status; [`reassemble`] and [`delta_stream`] drive a session from
//! a transport body.

use std::collections::VecDeque;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{DOCS_URL, Error, Result};

/// Payload that marks the end of the stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Number of skipped records after which a protocol drift warning is logged.
pub const DRIFT_WARN_THRESHOLD: usize = 16;

// ─────────────────────────────────────────────────────────────────────────────
// Decoding
// ─────────────────────────────────────────────────────────────────────────────

/// Incremental UTF-8 decoder.
///
/// An incomplete code point at the end of a chunk is held back until the
/// following chunk completes it. Invalid sequences decode to U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode as much of `chunk` (plus held-back bytes) as possible.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut out = String::with_capacity(self.pending.len());

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        // Truncated code point: wait for more bytes.
                        None => {
                            self.pending.drain(..valid);
                            break;
                        }
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                    }
                }
            }
        }

        out
    }

    /// Flush whatever is still held back.
    pub fn finish(&mut self) -> String {
        let out = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        out
    }

    /// Number of bytes waiting for completion.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Record splitting
// ─────────────────────────────────────────────────────────────────────────────

/// Splits decoded text into blank-line separated records.
#[derive(Debug, Default)]
pub struct RecordSplitter {
    buffer: String,
    /// Offset up to which `buffer` is known to hold no separator.
    scanned: usize,
}

impl RecordSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append text and return every record completed by it.
    pub fn push(&mut self, text: &str) -> Vec<String> {
        // Raw CR cannot appear inside a JSON string, so dropping it is safe
        // and turns CRLF framing into LF framing.
        self.buffer.extend(text.chars().filter(|c| *c != '\r'));

        let mut records = Vec::new();
        while let Some(end) = self.next_separator() {
            let block: String = self.buffer.drain(..end + 2).collect();
            self.scanned = 0;
            let block = block.trim();
            if !block.is_empty() {
                records.push(block.to_string());
            }
        }
        // A trailing '\n' may pair with the next push.
        self.scanned = self.buffer.len().saturating_sub(1);
        records
    }

    fn next_separator(&self) -> Option<usize> {
        self.buffer.as_bytes()[self.scanned..]
            .windows(2)
            .position(|pair| pair == b"\n\n")
            .map(|at| self.scanned + at)
    }

    /// Return the unterminated trailing record, if any.
    pub fn finish(&mut self) -> Option<String> {
        self.scanned = 0;
        let rest = std::mem::take(&mut self.buffer);
        let rest = rest.trim();
        (!rest.is_empty()).then(|| rest.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Record parsing
// ─────────────────────────────────────────────────────────────────────────────

/// Meaning of one parsed record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// Incremental text.
    Delta(String),
    /// End-of-stream sentinel.
    Done,
    /// Valid but carries no text (keep-alives, role announcements, ...).
    Empty,
    /// Not JSON. Holds the offending payload.
    Malformed(String),
}

/// Interpret one payload (already stripped of any `data:` prefix).
pub fn parse_payload(payload: &str) -> Record {
    let payload = payload.trim();
    if payload.is_empty() {
        return Record::Empty;
    }
    if payload == DONE_SENTINEL {
        return Record::Done;
    }

    match serde_json::from_str::<Value>(payload) {
        Ok(value) => match extract_delta(&value) {
            Some(text) if !text.is_empty() => Record::Delta(text.to_string()),
            _ => Record::Empty,
        },
        Err(_) => Record::Malformed(payload.to_string()),
    }
}

/// Pull the text delta out of either payload shape the API uses.
fn extract_delta(value: &Value) -> Option<&str> {
    if let Some(text) = value.get("data").and_then(Value::as_str) {
        return Some(text);
    }
    value
        .get("choices")?
        .get(0)?
        .get("delta")?
        .get("content")?
        .as_str()
}

/// Interpret one blank-line separated block.
///
/// `data:` lines are joined as in SSE. Blocks without any `data:` line are
/// taken as a bare payload. If the joined payload does not parse but spans
/// several lines, each line is tried on its own so that newline-delimited
/// records sharing a block are not lost.
pub fn parse_block(block: &str) -> Vec<Record> {
    let mut data_lines = Vec::new();
    let mut other_lines = Vec::new();

    for line in block.lines() {
        if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        } else if line.starts_with(':') || is_sse_field(line) {
            // comment or non-data field
        } else if !line.trim().is_empty() {
            other_lines.push(line);
        }
    }

    let lines = if data_lines.is_empty() {
        other_lines
    } else {
        data_lines
    };
    if lines.is_empty() {
        return vec![Record::Empty];
    }

    let joined = parse_payload(&lines.join("\n"));
    if matches!(joined, Record::Malformed(_)) && lines.len() > 1 {
        return lines.iter().map(|line| parse_payload(line)).collect();
    }
    vec![joined]
}

fn is_sse_field(line: &str) -> bool {
    ["event:", "id:", "retry:"]
        .iter()
        .any(|field| line.starts_with(field))
}

// ─────────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────────

/// Where a streaming session stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamStatus {
    /// Still consuming the body.
    Streaming,
    /// Sentinel seen or body ended.
    Completed,
    /// Stopped by the caller.
    Cancelled,
    /// The transport failed mid-body.
    Failed {
        /// Transport error text.
        error: String,
    },
}

impl StreamStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamStatus::Streaming)
    }
}

/// Result of a streamed chat completion.
///
/// Transport failures after the response started are reported here rather
/// than as an `Err`: the text gathered so far is kept, followed by a
/// diagnostic line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatOutcome {
    /// Concatenation of every delta delivered, in order.
    pub text: String,
    /// How the stream ended.
    pub status: StreamStatus,
    /// Number of deltas delivered.
    pub deltas: usize,
    /// Records dropped because they were not valid JSON.
    pub skipped_records: usize,
}

impl ChatOutcome {
    /// Take the reassembled text.
    pub fn into_text(self) -> String {
        self.text
    }

    /// Whether the server finished the answer.
    pub fn is_complete(&self) -> bool {
        self.status == StreamStatus::Completed
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == StreamStatus::Cancelled
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, StreamStatus::Failed { .. })
    }
}

/// Per-call reassembly state.
#[derive(Debug)]
pub struct StreamingSession {
    decoder: Utf8Decoder,
    splitter: RecordSplitter,
    text: String,
    status: StreamStatus,
    deltas: usize,
    skipped: usize,
}

impl Default for StreamingSession {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamingSession {
    pub fn new() -> Self {
        Self {
            decoder: Utf8Decoder::new(),
            splitter: RecordSplitter::new(),
            text: String::new(),
            status: StreamStatus::Streaming,
            deltas: 0,
            skipped: 0,
        }
    }

    pub fn status(&self) -> &StreamStatus {
        &self.status
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Text accumulated so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Consume one body chunk, returning the deltas it completed.
    ///
    /// Does nothing once the session is terminal.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        if self.is_terminal() {
            return Vec::new();
        }
        let text = self.decoder.decode(chunk);
        let blocks = self.splitter.push(&text);
        self.apply(blocks)
    }

    /// The body ended; flush buffers and complete.
    pub fn finish(&mut self) -> Vec<String> {
        if self.is_terminal() {
            return Vec::new();
        }
        let tail = self.decoder.finish();
        let mut blocks = self.splitter.push(&tail);
        blocks.extend(self.splitter.finish());
        let deltas = self.apply(blocks);
        self.complete();
        deltas
    }

    /// Stop early, keeping the accumulator as is.
    pub fn cancel(&mut self) {
        if self.is_terminal() {
            return;
        }
        tracing::debug!(deltas = self.deltas, "chat stream cancelled");
        self.status = StreamStatus::Cancelled;
    }

    /// Record a transport failure.
    ///
    /// Returns the diagnostic appended to the accumulator, or `None` if the
    /// session had already ended.
    pub fn fail(&mut self, error: &str) -> Option<String> {
        if self.is_terminal() {
            return None;
        }
        tracing::warn!(error = %error, deltas = self.deltas, "chat stream interrupted");
        let diagnostic = format!(
            "\n\n[judini] The response stream was interrupted: {}. If this keeps happening, see {}",
            error, DOCS_URL
        );
        self.text.push_str(&diagnostic);
        self.status = StreamStatus::Failed {
            error: error.to_string(),
        };
        Some(diagnostic)
    }

    pub fn into_outcome(self) -> ChatOutcome {
        ChatOutcome {
            text: self.text,
            status: self.status,
            deltas: self.deltas,
            skipped_records: self.skipped,
        }
    }

    fn complete(&mut self) {
        if !self.is_terminal() {
            tracing::debug!(
                deltas = self.deltas,
                skipped = self.skipped,
                "chat stream completed"
            );
            self.status = StreamStatus::Completed;
        }
    }

    fn apply(&mut self, blocks: Vec<String>) -> Vec<String> {
        let mut out = Vec::new();
        for block in blocks {
            for record in parse_block(&block) {
                match record {
                    Record::Delta(text) => {
                        self.text.push_str(&text);
                        self.deltas += 1;
                        out.push(text);
                    }
                    Record::Done => {
                        self.complete();
                        return out;
                    }
                    Record::Empty => {}
                    Record::Malformed(payload) => self.skip(&payload),
                }
            }
        }
        out
    }

    fn skip(&mut self, payload: &str) {
        self.skipped += 1;
        tracing::debug!(payload = %payload, skipped = self.skipped, "skipping malformed stream record");
        if self.skipped == DRIFT_WARN_THRESHOLD {
            tracing::warn!(
                skipped = self.skipped,
                "many malformed stream records; the response format may have changed"
            );
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Drivers
// ─────────────────────────────────────────────────────────────────────────────

/// Drive a session over a body stream, calling `on_delta` for every delta.
///
/// Cancellation is checked before each chunk is processed and also wakes a
/// read that is waiting on a stalled server. The body is dropped (releasing
/// the connection) as soon as the session ends.
pub async fn reassemble<S, F>(mut body: S, token: CancellationToken, mut on_delta: F) -> ChatOutcome
where
    S: Stream<Item = Result<Bytes>> + Unpin,
    F: FnMut(&str),
{
    let mut session = StreamingSession::new();

    while !session.is_terminal() {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => {
                session.cancel();
                break;
            }
            next = body.next() => next,
        };

        if token.is_cancelled() {
            session.cancel();
            break;
        }

        match next {
            Some(Ok(chunk)) => {
                for delta in session.feed(&chunk) {
                    on_delta(delta.as_str());
                }
            }
            Some(Err(e)) => {
                if let Some(diagnostic) = session.fail(&e.to_string()) {
                    on_delta(diagnostic.as_str());
                }
            }
            None => {
                for delta in session.finish() {
                    on_delta(delta.as_str());
                }
            }
        }
    }

    drop(body);
    session.into_outcome()
}

/// Lazily yield deltas from a body stream.
///
/// Ends after the sentinel, at end of body, or once `token` is cancelled.
/// A transport failure is yielded as one `Err` and ends the stream.
pub fn delta_stream<S>(
    body: S,
    token: CancellationToken,
) -> impl Stream<Item = Result<String>> + Send + 'static
where
    S: Stream<Item = Result<Bytes>> + Send + Unpin + 'static,
{
    let state = DeltaState {
        body,
        session: StreamingSession::new(),
        queue: VecDeque::new(),
        token,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(delta) = state.queue.pop_front() {
                return Some((Ok(delta), state));
            }
            if state.session.is_terminal() {
                return None;
            }

            let next = tokio::select! {
                biased;
                _ = state.token.cancelled() => {
                    state.session.cancel();
                    continue;
                }
                next = state.body.next() => next,
            };

            match next {
                Some(Ok(chunk)) => {
                    let deltas = state.session.feed(&chunk);
                    state.queue.extend(deltas);
                }
                Some(Err(e)) => {
                    let message = e.to_string();
                    state.session.fail(&message);
                    return Some((Err(Error::Stream(message)), state));
                }
                None => {
                    let deltas = state.session.finish();
                    state.queue.extend(deltas);
                }
            }
        }
    })
}

struct DeltaState<S> {
    body: S,
    session: StreamingSession,
    queue: VecDeque<String>,
    token: CancellationToken,
}
