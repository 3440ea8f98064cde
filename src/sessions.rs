//! Mapping caller conversation ids to backend chat sessions.
//!
//! Entries live for the process lifetime; there is no expiry. The map is
//! held under one async mutex across the whole check-create-store sequence
//! so two concurrent requests for the same conversation id never allocate
//! duplicate backend sessions.
use crate::client::HttpClient;
use crate::errors::ProxyError;
use crate::upstream;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::debug;
use url::Url;

#[derive(Debug, Default)]
pub struct SessionResolver {
    conversations: Mutex<HashMap<String, String>>,
}

impl SessionResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the backend session id for a request.
    ///
    /// Without a conversation id (the stateless path) a fresh backend
    /// session is always created. With one, an existing mapping is reused;
    /// on a miss a session is created and remembered.
    pub async fn resolve<T: HttpClient>(
        &self,
        conversation_id: Option<&str>,
        client: &T,
        base_url: &Url,
        token: &str,
    ) -> Result<String, ProxyError> {
        let Some(conversation_id) = conversation_id else {
            return upstream::create_session(client, base_url, token).await;
        };

        let mut conversations = self.conversations.lock().await;
        if let Some(session_id) = conversations.get(conversation_id) {
            debug!("reusing backend session {session_id} for conversation {conversation_id}");
            return Ok(session_id.clone());
        }
        let session_id = upstream::create_session(client, base_url, token).await?;
        conversations.insert(conversation_id.to_owned(), session_id.clone());
        Ok(session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockHttpClient;
    use axum::http::StatusCode;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn base() -> Url {
        "https://www.kimi.test".parse().unwrap()
    }

    fn counting_session_client() -> MockHttpClient {
        let counter = std::sync::Arc::new(AtomicUsize::new(0));
        MockHttpClient::with_responder(move |_req| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            MockHttpClient::json_response(
                StatusCode::OK,
                &serde_json::json!({"id": format!("sess-{n}")}),
            )
        })
    }

    #[tokio::test]
    async fn same_conversation_reuses_one_session() {
        let client = counting_session_client();
        let resolver = SessionResolver::new();

        let first = resolver
            .resolve(Some("conv-a"), &client, &base(), "tok")
            .await
            .unwrap();
        let second = resolver
            .resolve(Some("conv-a"), &client, &base(), "tok")
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(client.get_requests().len(), 1);
    }

    #[tokio::test]
    async fn different_conversations_get_distinct_sessions() {
        let client = counting_session_client();
        let resolver = SessionResolver::new();

        let a = resolver
            .resolve(Some("conv-a"), &client, &base(), "tok")
            .await
            .unwrap();
        let b = resolver
            .resolve(Some("conv-b"), &client, &base(), "tok")
            .await
            .unwrap();

        assert_ne!(a, b);
        assert_eq!(client.get_requests().len(), 2);
    }

    #[tokio::test]
    async fn stateless_resolution_never_reuses() {
        let client = counting_session_client();
        let resolver = SessionResolver::new();

        let a = resolver.resolve(None, &client, &base(), "tok").await.unwrap();
        let b = resolver.resolve(None, &client, &base(), "tok").await.unwrap();

        assert_ne!(a, b);
        assert_eq!(client.get_requests().len(), 2);
    }

    #[tokio::test]
    async fn creation_failure_leaves_no_mapping() {
        let failing = MockHttpClient::new(StatusCode::INTERNAL_SERVER_ERROR, "{}");
        let resolver = SessionResolver::new();

        let err = resolver
            .resolve(Some("conv-a"), &failing, &base(), "tok")
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::SessionCreation(_)));

        // A later successful call creates (and stores) the session.
        let working = counting_session_client();
        let id = resolver
            .resolve(Some("conv-a"), &working, &base(), "tok")
            .await
            .unwrap();
        assert_eq!(id, "sess-0");
    }
}
