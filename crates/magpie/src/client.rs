//! The stream consumer's transport: talks to the relay, not to Ollama.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::errors::{ChatError, ChatResult};
use crate::text::Utf8Decoder;

/// A generation request as sent to the relay. Immutable once sent.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub model: String,
    pub memory: Vec<String>,
}

/// Cooperative cancellation handle for one in-flight generation.
///
/// Clones share the same state: cancel from any clone, observe from any other.
/// The in-flight read notices the signal at its next suspension point and
/// unwinds with [`ChatError::Cancelled`].
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelState>,
}

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Resolves once `cancel` has been called, including calls made before
    /// this future was created.
    pub async fn cancelled(&self) {
        let notified = self.inner.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

/// Relay health as reported by `GET /health`.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthReport {
    pub ok: bool,
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub error: Option<String>,
}

/// HTTP client for the relay.
#[derive(Debug, Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    base_url: String,
}

impl ChatClient {
    pub fn new(base_url: impl Into<String>) -> ChatResult<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(ChatError::transport)?;
        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Probe the relay's backend liveness endpoint.
    pub async fn health(&self) -> ChatResult<HealthReport> {
        let response = self
            .http
            .get(self.url("/health"))
            .send()
            .await
            .map_err(ChatError::transport)?;
        response.json().await.map_err(ChatError::transport)
    }

    /// Send a generation request and stream the response body.
    ///
    /// Each decoded chunk of text is handed to `on_fragment` in arrival
    /// order. Returns once the stream ends; a cancel signal or transport
    /// failure surfaces as the matching [`ChatError`] variant, and the caller
    /// decides what marker to show.
    pub async fn stream_chat(
        &self,
        request: &GenerationRequest,
        cancel: &CancelToken,
        mut on_fragment: impl FnMut(&str),
    ) -> ChatResult<()> {
        let send = self.http.post(self.url("/api/chat")).json(request).send();
        let response = tokio::select! {
            result = send => result.map_err(ChatError::transport)?,
            _ = cancel.cancelled() => return Err(ChatError::Cancelled),
        };

        let status = response.status();
        if !status.is_success() {
            let details = response.text().await.unwrap_or_default();
            return Err(ChatError::UpstreamUnavailable {
                status: Some(status.as_u16()),
                details,
            });
        }

        let mut body = response.bytes_stream();
        let mut decoder = Utf8Decoder::new();
        loop {
            tokio::select! {
                chunk = body.next() => match chunk {
                    Some(Ok(bytes)) => {
                        let text = decoder.decode(&bytes);
                        if !text.is_empty() {
                            on_fragment(&text);
                        }
                    }
                    Some(Err(e)) => return Err(ChatError::transport(e)),
                    None => {
                        let tail = decoder.finish();
                        if !tail.is_empty() {
                            on_fragment(&tail);
                        }
                        return Ok(());
                    }
                },
                _ = cancel.cancelled() => return Err(ChatError::Cancelled),
            }
        }
    }
}
