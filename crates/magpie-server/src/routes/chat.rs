//! The streaming chat relay: Ollama NDJSON in, plain text out.

use crate::state::AppState;
use axum::{
    extract::State,
    http::{self, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use futures::{stream::StreamExt, Stream};
use magpie::errors::ChatError;
use magpie::upstream::compose_prompt;
use serde::Deserialize;
use serde_json::json;
use std::{
    convert::Infallible,
    pin::Pin,
    task::{Context, Poll},
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

#[derive(Debug, Deserialize)]
struct ChatRequest {
    prompt: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    memory: Vec<String>,
}

/// Channel-backed streaming body carrying the concatenated text fragments.
struct TextStreamResponse {
    rx: ReceiverStream<Bytes>,
}

impl TextStreamResponse {
    fn new(rx: ReceiverStream<Bytes>) -> Self {
        Self { rx }
    }
}

impl Stream for TextStreamResponse {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx).poll_next(cx).map(|opt| opt.map(Ok))
    }
}

impl IntoResponse for TextStreamResponse {
    fn into_response(self) -> axum::response::Response {
        let body = axum::body::Body::from_stream(self);

        http::Response::builder()
            .header("Content-Type", "text/plain; charset=utf-8")
            .header("Cache-Control", "no-cache")
            .header("Connection", "keep-alive")
            .body(body)
            .unwrap()
    }
}

async fn handler(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> axum::response::Response {
    let model = request.model.unwrap_or_else(|| state.default_model.clone());
    let prompt = compose_prompt(&request.prompt, &request.memory);

    // Establish the upstream stream first: any failure here gets a structured
    // error response, before a single byte of the text stream exists.
    let fragments = match state.backend.generate(&model, &prompt).await {
        Ok(stream) => stream,
        Err(ChatError::UpstreamUnavailable { status, details }) => {
            tracing::error!(?status, "upstream generate failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "upstream error", "details": details })),
            )
                .into_response();
        }
        Err(err) => {
            tracing::error!("failed to open generate stream: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": err.to_string() })),
            )
                .into_response();
        }
    };

    // Write-through forwarding, one channel send per fragment.
    let (tx, rx) = mpsc::channel::<Bytes>(100);
    tokio::spawn(async move {
        let mut fragments = std::pin::pin!(fragments);
        while let Some(item) = fragments.next().await {
            match item {
                Ok(fragment) => {
                    // A closed channel means the client went away; dropping
                    // the fragment stream cancels the upstream request.
                    if tx.send(Bytes::from(fragment)).await.is_err() {
                        tracing::debug!("client disconnected, abandoning upstream stream");
                        break;
                    }
                }
                Err(err) => {
                    tracing::error!("upstream stream failed mid-reply: {err}");
                    break;
                }
            }
        }
    });

    TextStreamResponse::new(ReceiverStream::new(rx)).into_response()
}

// Configure routes for this module
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/api/chat", post(handler))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use magpie::upstream::OllamaBackend;
    use tower::ServiceExt;
    use wiremock::matchers::{body_partial_json, method, path as url_path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn app_for(upstream: &MockServer) -> Router {
        let state = AppState {
            backend: OllamaBackend::new(upstream.uri()).unwrap(),
            default_model: "llama3".to_string(),
        };
        routes(state)
    }

    fn chat_request(body: serde_json::Value) -> http::Request<axum::body::Body> {
        http::Request::builder()
            .method("POST")
            .uri("/api/chat")
            .header("content-type", "application/json")
            .body(axum::body::Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn relay_concatenates_fragments_as_plain_text() {
        let upstream = MockServer::start().await;
        let ndjson = "{\"response\":\"Hello\",\"done\":false}\n\
                      {\"response\":\" world\",\"done\":false}\n\
                      {\"response\":\"\",\"done\":true}\n";
        Mock::given(method("POST"))
            .and(url_path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(ndjson, "application/x-ndjson"))
            .mount(&upstream)
            .await;

        let response = app_for(&upstream)
            .oneshot(chat_request(json!({"prompt": "hi"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "text/plain; charset=utf-8"
        );
        assert_eq!(
            response.headers().get("cache-control").unwrap(),
            "no-cache"
        );
        assert_eq!(body_text(response).await, "Hello world");
    }

    #[tokio::test]
    async fn frames_after_done_are_never_flushed() {
        let upstream = MockServer::start().await;
        let ndjson =
            "{\"response\":\"keep\",\"done\":false}\n{\"done\":true}\n{\"response\":\"dropped\"}\n";
        Mock::given(method("POST"))
            .and(url_path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(ndjson, "application/x-ndjson"))
            .mount(&upstream)
            .await;

        let response = app_for(&upstream)
            .oneshot(chat_request(json!({"prompt": "hi"})))
            .await
            .unwrap();
        assert_eq!(body_text(response).await, "keep");
    }

    #[tokio::test]
    async fn malformed_frame_does_not_interrupt_delivery() {
        let upstream = MockServer::start().await;
        let ndjson =
            "{\"response\":\"a\",\"done\":false}\n{not json\n{\"response\":\"b\",\"done\":true}\n";
        Mock::given(method("POST"))
            .and(url_path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(ndjson, "application/x-ndjson"))
            .mount(&upstream)
            .await;

        let response = app_for(&upstream)
            .oneshot(chat_request(json!({"prompt": "hi"})))
            .await
            .unwrap();
        assert_eq!(body_text(response).await, "ab");
    }

    #[tokio::test]
    async fn upstream_failure_yields_structured_500_and_no_stream() {
        let upstream = MockServer::start().await;
        Mock::given(method("POST"))
            .and(url_path("/api/generate"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&upstream)
            .await;

        let response = app_for(&upstream)
            .oneshot(chat_request(json!({"prompt": "hi"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert!(body.get("error").is_some());
    }

    #[tokio::test]
    async fn memory_is_composed_into_the_prompt() {
        let upstream = MockServer::start().await;
        Mock::given(method("POST"))
            .and(url_path("/api/generate"))
            .and(body_partial_json(json!({
                "prompt": "Chat memory:\n- likes rust\n\nUser:\nhi",
                "stream": true,
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("{\"done\":true}\n", "application/x-ndjson"),
            )
            .expect(1)
            .mount(&upstream)
            .await;

        let response = app_for(&upstream)
            .oneshot(chat_request(
                json!({"prompt": "hi", "memory": ["likes rust"]}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_model_falls_back_to_default() {
        let upstream = MockServer::start().await;
        Mock::given(method("POST"))
            .and(url_path("/api/generate"))
            .and(body_partial_json(json!({"model": "llama3"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("{\"done\":true}\n", "application/x-ndjson"),
            )
            .expect(1)
            .mount(&upstream)
            .await;

        let response = app_for(&upstream)
            .oneshot(chat_request(json!({"prompt": "hi"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
