//! Streaming access to the Ollama generate API.
//!
//! Ollama emits one JSON object per line:
//! ```text
//! {"model":"llama3","response":"Hello","done":false}
//! {"model":"llama3","response":" world","done":false}
//! {"model":"llama3","response":"","done":true,"done_reason":"stop"}
//! ```
//! This module buffers the raw byte stream into lines, decodes each line as a
//! frame on a best-effort basis, and re-emits the text fragments.

use std::time::Duration;

use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;

use crate::errors::{ChatError, ChatResult};

pub const OLLAMA_HOST: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "llama3";

/// One newline-delimited JSON object from the backend's streaming output.
///
/// Only the fields the relay acts on are decoded; anything else the backend
/// includes is ignored.
#[derive(Debug, Default, Deserialize)]
pub struct GenerateFrame {
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub done: bool,
}

/// Best-effort frame decode. One corrupt frame must not abort an otherwise
/// good stream, so a malformed line is a `Skip`, not an error.
#[derive(Debug)]
pub enum FrameDecode {
    Frame(GenerateFrame),
    Skip,
}

pub fn decode_frame(line: &str) -> FrameDecode {
    let line = line.trim();
    if line.is_empty() {
        return FrameDecode::Skip;
    }
    match serde_json::from_str(line) {
        Ok(frame) => FrameDecode::Frame(frame),
        Err(err) => {
            tracing::debug!("skipping malformed frame: {err}");
            FrameDecode::Skip
        }
    }
}

/// Accumulates upstream bytes not yet resolved into a complete line.
///
/// Byte-based, so a UTF-8 sequence split across chunks never corrupts a line:
/// the split only resolves once the newline arrives.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Split off the next complete line, without its terminator.
    pub fn next_line(&mut self) -> Option<String> {
        let pos = self.buf.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }
}

/// Prepend chat memory to the prompt as a formatted context block.
///
/// Pure string composition; memory entries are never parsed.
pub fn compose_prompt(prompt: &str, memory: &[String]) -> String {
    if memory.is_empty() {
        return prompt.to_string();
    }
    let entries = memory
        .iter()
        .map(|m| format!("- {m}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!("Chat memory:\n{entries}\n\nUser:\n{prompt}")
}

/// Client for a local Ollama server.
#[derive(Debug, Clone)]
pub struct OllamaBackend {
    client: reqwest::Client,
    host: String,
}

impl OllamaBackend {
    pub fn new(host: impl Into<String>) -> ChatResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(600))
            .build()
            .map_err(ChatError::transport)?;
        Ok(Self {
            client,
            host: host.into(),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Liveness probe: hit the server root and report its status code.
    pub async fn probe(&self) -> ChatResult<u16> {
        let response = self
            .client
            .get(format!("{}/", self.host.trim_end_matches('/')))
            .send()
            .await
            .map_err(ChatError::transport)?;
        Ok(response.status().as_u16())
    }

    /// Open a streaming generation and return the stream of text fragments.
    ///
    /// Fails with [`ChatError::UpstreamUnavailable`] if the call cannot be
    /// established; once the stream is returned, no further frames are read
    /// after a `done` frame, and upstream EOF without `done` simply ends the
    /// stream.
    pub async fn generate(
        &self,
        model: &str,
        prompt: &str,
    ) -> ChatResult<impl Stream<Item = ChatResult<String>> + Send + 'static> {
        let url = format!("{}/api/generate", self.host.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&json!({ "model": model, "prompt": prompt, "stream": true }))
            .send()
            .await
            .map_err(|e| ChatError::UpstreamUnavailable {
                status: None,
                details: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let details = response.text().await.unwrap_or_default();
            return Err(ChatError::UpstreamUnavailable {
                status: Some(status.as_u16()),
                details,
            });
        }

        Ok(fragment_stream(response.bytes_stream()))
    }
}

/// Re-frame a raw NDJSON byte stream as a stream of text fragments.
///
/// Fragments are yielded in arrival order, one per non-empty `response`
/// field. The stream ends at the first `done` frame (remaining bytes are
/// dropped unread), at upstream EOF, or after yielding a single transport
/// error.
pub fn fragment_stream(
    bytes: impl Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
) -> impl Stream<Item = ChatResult<String>> + Send + 'static {
    async_stream::stream! {
        let mut buffer = LineBuffer::new();
        let mut bytes = std::pin::pin!(bytes);

        'read: while let Some(chunk) = bytes.next().await {
            let chunk = match chunk {
                Ok(b) => b,
                Err(e) => {
                    tracing::warn!("upstream read failed mid-stream: {e}");
                    yield Err(ChatError::transport(e));
                    return;
                }
            };

            buffer.extend(&chunk);
            while let Some(line) = buffer.next_line() {
                match decode_frame(&line) {
                    FrameDecode::Frame(frame) => {
                        if !frame.response.is_empty() {
                            yield Ok(frame.response);
                        }
                        if frame.done {
                            break 'read;
                        }
                    }
                    FrameDecode::Skip => continue,
                }
            }
        }
    }
}
