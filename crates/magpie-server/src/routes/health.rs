use crate::state::AppState;
use axum::{
    extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router,
};
use serde_json::json;

/// Probe the upstream backend and report its reachability.
async fn handler(State(state): State<AppState>) -> axum::response::Response {
    match state.backend.probe().await {
        Ok(status) => Json(json!({ "ok": true, "status": status })).into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "ok": false, "error": err.to_string() })),
        )
            .into_response(),
    }
}

pub fn routes(state: AppState) -> Router {
    Router::new().route("/health", get(handler)).with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http;
    use http_body_util::BodyExt;
    use magpie::upstream::OllamaBackend;
    use tower::ServiceExt;
    use wiremock::matchers::{method, path as url_path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn health_request() -> http::Request<axum::body::Body> {
        http::Request::builder()
            .method("GET")
            .uri("/health")
            .body(axum::body::Body::empty())
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn reports_ok_with_upstream_status() {
        let upstream = MockServer::start().await;
        Mock::given(method("GET"))
            .and(url_path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Ollama is running"))
            .mount(&upstream)
            .await;

        let state = AppState {
            backend: OllamaBackend::new(upstream.uri()).unwrap(),
            default_model: "llama3".to_string(),
        };
        let response = routes(state).oneshot(health_request()).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["ok"], true);
        assert_eq!(body["status"], 200);
    }

    #[tokio::test]
    async fn reports_error_when_upstream_is_unreachable() {
        let state = AppState {
            backend: OllamaBackend::new("http://127.0.0.1:1").unwrap(),
            default_model: "llama3".to_string(),
        };
        let response = routes(state).oneshot(health_request()).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["ok"], false);
        assert!(body["error"].as_str().is_some());
    }
}
