//! Kimi Gateway - an OpenAI-compatible proxy for the Kimi chat API
//!
//! This library exposes the OpenAI chat-completion surface (`/v1/models`,
//! `/v1/chat/completions`) and translates requests onto the Kimi web
//! backend: it rotates access tokens, maps caller conversation ids to
//! backend chat sessions, and re-frames the backend's streaming events as
//! OpenAI-style SSE chunks (or aggregates them into one response).

use axum::Router;
use axum::routing::{get, post};
use std::sync::Arc;
use tracing::{info, instrument};
use url::Url;

pub mod client;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod sessions;
pub mod sse;
pub mod tokens;
pub mod translate;
pub mod upstream;

use client::{HttpClient, HyperClient};
use handlers::{chat_completions, list_models, stateful_chat_completions};
use models::ModelMap;
use sessions::SessionResolver;
use tokens::TokenPool;

/// Shared per-process state: the backend HTTP client, the static model map,
/// the token rotation cursor, and the conversation-to-session map.
#[derive(Clone, Debug)]
pub struct AppState<T: HttpClient> {
    pub http_client: T,
    pub base_url: Url,
    pub models: Arc<ModelMap>,
    pub tokens: Arc<TokenPool>,
    pub sessions: Arc<SessionResolver>,
}

impl AppState<HyperClient> {
    /// Create a new AppState with the default Hyper client
    pub fn new(base_url: Url, tokens: TokenPool) -> Self {
        let http_client = client::create_hyper_client();
        Self::with_client(base_url, tokens, http_client)
    }
}

impl<T: HttpClient> AppState<T> {
    /// Create a new AppState with a custom HTTP client (useful for testing)
    pub fn with_client(base_url: Url, tokens: TokenPool, http_client: T) -> Self {
        Self {
            http_client,
            base_url,
            models: Arc::new(ModelMap::builtin()),
            tokens: Arc::new(tokens),
            sessions: Arc::new(SessionResolver::new()),
        }
    }
}

/// Build the main router for the gateway
/// This creates routes for:
/// - `/v1/models` - Returns the supported models
/// - `/v1/chat/completions` - Stateless completions (fresh backend session per call)
/// - `/v1/chat/completions/{conversation_id}` - Stateful completions (session reuse)
#[instrument(skip(state))]
pub fn build_router<T: HttpClient + Clone + Send + Sync + 'static>(state: AppState<T>) -> Router {
    info!("Building router");
    Router::new()
        .route("/v1/models", get(list_models))
        .route("/v1/chat/completions", post(chat_completions))
        .route(
            "/v1/chat/completions/{conversation_id}",
            post(stateful_chat_completions),
        )
        .with_state(state)
}

/// Mock HTTP client support shared by unit and integration tests.
#[doc(hidden)]
pub mod test_utils {
    use super::*;
    use async_trait::async_trait;
    use axum::http::StatusCode;
    use std::sync::{Arc, Mutex};

    /// Records every outbound request and answers each one through a
    /// caller-supplied responder, so tests can script the session and
    /// completion endpoints independently.
    pub struct MockHttpClient {
        pub requests: Arc<Mutex<Vec<MockRequest>>>,
        responder: Arc<dyn Fn(&MockRequest) -> axum::response::Response + Send + Sync>,
    }

    #[derive(Debug, Clone)]
    pub struct MockRequest {
        pub method: String,
        pub uri: String,
        pub headers: Vec<(String, String)>,
        pub body: Vec<u8>,
    }

    impl MockRequest {
        pub fn header(&self, name: &str) -> Option<&str> {
            self.headers
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.as_str())
        }
    }

    impl MockHttpClient {
        /// Answers every request with one fixed response.
        pub fn new(status: StatusCode, body: &str) -> Self {
            let body = body.to_string();
            Self::with_responder(move |_| {
                axum::response::Response::builder()
                    .status(status)
                    .body(axum::body::Body::from(body.clone()))
                    .unwrap()
            })
        }

        /// Answers every request with a chunked streaming body.
        pub fn new_streaming(status: StatusCode, chunks: Vec<String>) -> Self {
            Self::with_responder(move |_| Self::streaming_response(status, chunks.clone()))
        }

        /// Like `new_streaming`, but the body errors after the given chunks,
        /// simulating a mid-stream connection reset.
        pub fn new_streaming_with_failure(status: StatusCode, chunks: Vec<String>) -> Self {
            Self::with_responder(move |_| Self::failing_streaming_response(status, chunks.clone()))
        }

        pub fn with_responder(
            responder: impl Fn(&MockRequest) -> axum::response::Response + Send + Sync + 'static,
        ) -> Self {
            Self {
                requests: Arc::new(Mutex::new(Vec::new())),
                responder: Arc::new(responder),
            }
        }

        pub fn json_response(status: StatusCode, value: &serde_json::Value) -> axum::response::Response {
            axum::response::Response::builder()
                .status(status)
                .header("content-type", "application/json")
                .body(axum::body::Body::from(value.to_string()))
                .unwrap()
        }

        pub fn streaming_response(status: StatusCode, chunks: Vec<String>) -> axum::response::Response {
            use axum::body::Body;
            use futures_util::stream;

            let stream = stream::iter(
                chunks
                    .into_iter()
                    .map(|chunk| Ok::<_, std::io::Error>(chunk.into_bytes())),
            );

            axum::response::Response::builder()
                .status(status)
                .header("content-type", "text/event-stream")
                .header("cache-control", "no-cache")
                .body(Body::from_stream(stream))
                .unwrap()
        }

        /// A streaming body that drops the connection after the given chunks.
        pub fn failing_streaming_response(
            status: StatusCode,
            chunks: Vec<String>,
        ) -> axum::response::Response {
            use axum::body::Body;
            use futures_util::stream;

            let items = chunks
                .into_iter()
                .map(|chunk| Ok(chunk.into_bytes()))
                .chain(std::iter::once(Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "connection reset by peer",
                ))));

            axum::response::Response::builder()
                .status(status)
                .header("content-type", "text/event-stream")
                .body(Body::from_stream(stream::iter(items)))
                .unwrap()
        }

        pub fn get_requests(&self) -> Vec<MockRequest> {
            self.requests.lock().unwrap().clone()
        }

        /// Requests made to the session-creation endpoint.
        pub fn session_requests(&self) -> Vec<MockRequest> {
            self.get_requests()
                .into_iter()
                .filter(|r| r.uri.ends_with("/api/chat"))
                .collect()
        }

        /// Requests made to the streaming completion endpoint.
        pub fn completion_requests(&self) -> Vec<MockRequest> {
            self.get_requests()
                .into_iter()
                .filter(|r| r.uri.ends_with("/completion/stream"))
                .collect()
        }
    }

    impl std::fmt::Debug for MockHttpClient {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("MockHttpClient")
                .field("requests", &self.requests)
                .field("responder", &"<closure>")
                .finish()
        }
    }

    impl Clone for MockHttpClient {
        fn clone(&self) -> Self {
            Self {
                requests: Arc::clone(&self.requests),
                responder: Arc::clone(&self.responder),
            }
        }
    }

    #[async_trait]
    impl HttpClient for MockHttpClient {
        async fn request(
            &self,
            req: axum::extract::Request,
        ) -> Result<axum::response::Response, Box<dyn std::error::Error + Send + Sync>> {
            let method = req.method().to_string();
            let uri = req.uri().to_string();
            let headers = req
                .headers()
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
                .collect();

            let body = axum::body::to_bytes(req.into_body(), usize::MAX)
                .await
                .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)?
                .to_vec();

            let mock_request = MockRequest {
                method,
                uri,
                headers,
                body,
            };
            let response = (self.responder)(&mock_request);
            self.requests.lock().unwrap().push(mock_request);

            Ok(response)
        }
    }
}
