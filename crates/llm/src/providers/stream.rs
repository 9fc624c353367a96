//! Plumbing shared by the streaming providers: the HTTP round trip, line
//! splitting of the SSE body, and the byte-to-event stream.

use futures::stream::{self, Stream, StreamExt};
use serde_json::Value;
use std::collections::VecDeque;
use std::pin::Pin;
use tracing::warn;

use desk_tool_runtime::provider::EventStream;
use desk_tool_runtime::{LlmError, StreamEvent};

/// Used when a 429 response carries no `retry-after` header.
const DEFAULT_RETRY_AFTER_SECS: u64 = 30;

/// Turns SSE body bytes into stream events.
pub(crate) trait SseDecode: Send + 'static {
    fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent>;

    /// Flush whatever is buffered once the body has ended.
    fn finish(&mut self) -> Vec<StreamEvent>;
}

/// Splits a byte stream into lines, carrying incomplete UTF-8 sequences
/// and partial lines over to the next chunk.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    carry: Vec<u8>,
    line: String,
}

impl LineBuffer {
    /// Complete lines in `chunk`, without their terminators.
    pub(crate) fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.carry.extend_from_slice(chunk);
        let text = match std::str::from_utf8(&self.carry) {
            Ok(text) => {
                let text = text.to_string();
                self.carry.clear();
                text
            }
            Err(e) if e.error_len().is_none() => {
                let valid = e.valid_up_to();
                let text = String::from_utf8_lossy(&self.carry[..valid]).into_owned();
                self.carry.drain(..valid);
                text
            }
            Err(_) => {
                let text = String::from_utf8_lossy(&self.carry).into_owned();
                self.carry.clear();
                text
            }
        };

        let mut lines = Vec::new();
        for ch in text.chars() {
            if ch == '\n' {
                let line = std::mem::take(&mut self.line);
                lines.push(line.trim_end_matches('\r').to_string());
            } else {
                self.line.push(ch);
            }
        }
        lines
    }

    /// The unterminated last line, if any.
    pub(crate) fn finish(&mut self) -> Option<String> {
        if self.line.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.line);
        Some(line.trim_end_matches('\r').to_string())
    }
}

/// Send a streaming request; a non-success status becomes an [`LlmError`].
pub(crate) async fn send(request: reqwest::RequestBuilder, provider: &str) -> Result<reqwest::Response, LlmError> {
    let response = request
        .send()
        .await
        .map_err(|e| LlmError::NetworkError(e.to_string()))?;

    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    let body_text = response.text().await.unwrap_or_default();
    let err = error_for_status(status, retry_after, &body_text);
    warn!(provider, status, error = %err, "LLM request failed");
    Err(err)
}

type ByteStream = Pin<Box<dyn Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>>;

struct State<D> {
    bytes: ByteStream,
    decoder: D,
    pending: VecDeque<StreamEvent>,
    done: bool,
}

/// Decode the response body into events as the bytes arrive.
pub(crate) fn decode_events<D: SseDecode>(response: reqwest::Response, decoder: D) -> EventStream {
    let state = State {
        bytes: Box::pin(response.bytes_stream()),
        decoder,
        pending: VecDeque::new(),
        done: false,
    };

    let events = stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Some((Ok(event), state));
            }
            if state.done {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    let decoded = state.decoder.feed(&chunk);
                    state.pending.extend(decoded);
                }
                Some(Err(e)) => {
                    state.done = true;
                    return Some((Err(LlmError::StreamError(e.to_string())), state));
                }
                None => {
                    state.done = true;
                    let decoded = state.decoder.finish();
                    state.pending.extend(decoded);
                }
            }
        }
    });

    Box::pin(events)
}

/// Map a failed HTTP status onto the runtime's error kinds.
pub(crate) fn error_for_status(status: u16, retry_after: Option<u64>, body: &str) -> LlmError {
    match status {
        401 => LlmError::AuthError,
        429 => LlmError::RateLimited {
            retry_after_secs: retry_after.unwrap_or(DEFAULT_RETRY_AFTER_SECS),
        },
        _ => {
            let message = serde_json::from_str::<Value>(body)
                .ok()
                .and_then(|v| v["error"]["message"].as_str().map(String::from))
                .unwrap_or_else(|| body.to_string());
            LlmError::ApiError { status, message }
        }
    }
}
