//! Error types for the gateway's request path.
//!
//! Errors that occur before the response has committed to `text/event-stream`
//! are returned as plain HTTP statuses with an OpenAI-style error body.
//! Failures after streaming has begun never reach this type; they are emitted
//! in-band by the stream translator instead.
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// The requested model id is not in the configured model map.
    #[error("Model '{0}' not found.")]
    UnknownModel(String),

    /// The request's message list contains no "user" role message.
    #[error("No user message found.")]
    MissingUserMessage,

    /// Allocating a backend chat session failed. The payload is the remote
    /// failure detail, logged server-side and never shown to the caller.
    #[error("Failed to create Kimi chat session.")]
    SessionCreation(String),

    /// The backend completion failed during a non-streaming request.
    #[error("{0}")]
    Upstream(String),
}

impl ProxyError {
    fn status(&self) -> StatusCode {
        match self {
            ProxyError::UnknownModel(_) => StatusCode::NOT_FOUND,
            ProxyError::MissingUserMessage => StatusCode::BAD_REQUEST,
            ProxyError::SessionCreation(_) | ProxyError::Upstream(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            ProxyError::UnknownModel(_) => "invalid_request_error",
            ProxyError::MissingUserMessage => "invalid_request_error",
            ProxyError::SessionCreation(_) | ProxyError::Upstream(_) => "proxy_error",
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        if let ProxyError::SessionCreation(detail) = &self {
            error!("session creation failed: {detail}");
        }
        let body = json!({
            "error": {
                "message": self.to_string(),
                "type": self.error_type(),
            }
        });
        (self.status(), Json(body)).into_response()
    }
}
