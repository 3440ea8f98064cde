//! Outbound calls to the Kimi backend: session allocation and the streaming
//! completion endpoint.
//!
//! Both calls carry a rotated bearer token plus the browser-style headers
//! the backend expects, and both run under a bounded timeout. No retries
//! are performed; a failed call surfaces immediately.
use crate::client::HttpClient;
use crate::errors::ProxyError;
use axum::body::Body;
use axum::http::{Method, Request};
use axum::response::Response;
use serde_json::json;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Budget for allocating a backend chat session.
pub(crate) const SESSION_TIMEOUT: Duration = Duration::from_secs(20);
/// Budget for the completion call to return response headers.
pub(crate) const COMPLETION_TIMEOUT: Duration = Duration::from_secs(180);

/// The backend rejects requests without a browser user agent.
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36";

/// Builds a JSON POST to the backend with the common header set.
fn backend_request(url: &Url, token: &str, payload: &serde_json::Value) -> Result<Request<Body>, String> {
    let body = serde_json::to_vec(payload).map_err(|e| format!("payload serialization: {e}"))?;
    Request::builder()
        .method(Method::POST)
        .uri(url.as_str())
        .header("Authorization", format!("Bearer {token}"))
        .header("User-Agent", USER_AGENT)
        .header("Content-Type", "application/json")
        .body(Body::from(body))
        .map_err(|e| format!("request build: {e}"))
}

/// Allocates a new backend chat session and returns its id.
///
/// The session name and structural fields are fixed values the backend
/// requires for web-sourced chats.
pub async fn create_session<T: HttpClient>(
    client: &T,
    base_url: &Url,
    token: &str,
) -> Result<String, ProxyError> {
    let url = base_url
        .join("api/chat")
        .map_err(|e| ProxyError::SessionCreation(format!("invalid backend url: {e}")))?;
    let payload = json!({
        "name": "未命名会话",
        "born_from": "home",
        "kimiplus_id": "kimi",
        "is_example": false,
        "source": "web",
        "tags": [],
    });
    let request = backend_request(&url, token, &payload).map_err(ProxyError::SessionCreation)?;

    let response = tokio::time::timeout(SESSION_TIMEOUT, client.request(request))
        .await
        .map_err(|_| ProxyError::SessionCreation("session creation timed out".into()))?
        .map_err(|e| ProxyError::SessionCreation(format!("session creation request: {e}")))?;

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .map_err(|e| ProxyError::SessionCreation(format!("reading session response: {e}")))?;
    if !status.is_success() {
        return Err(ProxyError::SessionCreation(format!(
            "backend returned {status}: {}",
            String::from_utf8_lossy(&bytes)
        )));
    }

    let data: serde_json::Value = serde_json::from_slice(&bytes)
        .map_err(|e| ProxyError::SessionCreation(format!("parsing session response: {e}")))?;
    let chat_id = data
        .get("id")
        .and_then(|id| id.as_str())
        .ok_or_else(|| ProxyError::SessionCreation(format!("response lacks an id field: {data}")))?;

    debug!("created backend session {chat_id}");
    Ok(chat_id.to_owned())
}

/// Opens the streaming completion call for an existing backend session.
///
/// Returns the raw response once headers arrive; the body is the backend's
/// pseudo-SSE stream. Errors are returned as detail strings because the
/// caller turns them into in-band error events, never HTTP statuses.
pub async fn open_completion_stream<T: HttpClient>(
    client: &T,
    base_url: &Url,
    token: &str,
    session_id: &str,
    payload: &serde_json::Value,
) -> Result<Response, String> {
    let url = base_url
        .join(&format!("api/chat/{session_id}/completion/stream"))
        .map_err(|e| format!("invalid backend url: {e}"))?;
    let request = backend_request(&url, token, payload)?;

    let response = tokio::time::timeout(COMPLETION_TIMEOUT, client.request(request))
        .await
        .map_err(|_| "completion request timed out".to_string())?
        .map_err(|e| format!("completion request: {e}"))?;

    if !response.status().is_success() {
        return Err(format!("backend returned {}", response.status()));
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockHttpClient;
    use axum::http::StatusCode;

    fn base() -> Url {
        "https://www.kimi.test".parse().unwrap()
    }

    #[tokio::test]
    async fn create_session_returns_backend_id() {
        let client = MockHttpClient::new(StatusCode::OK, r#"{"id": "chat-abc"}"#);
        let id = create_session(&client, &base(), "tok-1").await.unwrap();
        assert_eq!(id, "chat-abc");

        let requests = client.get_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].uri, "https://www.kimi.test/api/chat");
        let auth = requests[0].header("authorization").unwrap();
        assert_eq!(auth, "Bearer tok-1");

        let payload: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(payload["kimiplus_id"], "kimi");
        assert_eq!(payload["source"], "web");
    }

    #[tokio::test]
    async fn create_session_rejects_missing_id() {
        let client = MockHttpClient::new(StatusCode::OK, r#"{"status": "ok"}"#);
        let err = create_session(&client, &base(), "tok-1").await.unwrap_err();
        assert!(matches!(err, ProxyError::SessionCreation(_)));
    }

    #[tokio::test]
    async fn create_session_rejects_non_success_status() {
        let client = MockHttpClient::new(StatusCode::FORBIDDEN, r#"{"error": "bad token"}"#);
        let err = create_session(&client, &base(), "tok-1").await.unwrap_err();
        assert!(matches!(err, ProxyError::SessionCreation(_)));
    }

    #[tokio::test]
    async fn completion_stream_rejects_non_success_status() {
        let client = MockHttpClient::new(StatusCode::BAD_GATEWAY, "upstream down");
        let err = open_completion_stream(&client, &base(), "tok-1", "chat-abc", &json!({}))
            .await
            .unwrap_err();
        assert!(err.contains("502"));
    }

    #[tokio::test]
    async fn completion_stream_targets_the_session_endpoint() {
        let client = MockHttpClient::new_streaming(StatusCode::OK, vec!["data: [DONE]\n\n".into()]);
        open_completion_stream(&client, &base(), "tok-1", "chat-abc", &json!({"model": "k2"}))
            .await
            .unwrap();

        let requests = client.get_requests();
        assert_eq!(
            requests[0].uri,
            "https://www.kimi.test/api/chat/chat-abc/completion/stream"
        );
    }
}
