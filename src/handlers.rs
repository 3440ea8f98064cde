/// Axum handlers for the gateway's three operations.
use crate::client::HttpClient;
use crate::errors::ProxyError;
use crate::models::{ChatCompletionRequest, ModelList};
use crate::translate;
use crate::AppState;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::StreamExt;
use std::convert::Infallible;
use tracing::{info, instrument};

/// `GET /v1/models`: the static model map as OpenAI model cards.
#[instrument(skip(state))]
pub async fn list_models<T: HttpClient>(State(state): State<AppState<T>>) -> impl IntoResponse {
    Json(ModelList::from_map(&state.models))
}

/// `POST /v1/chat/completions`: the stateless path. Every call allocates a
/// fresh backend session.
#[instrument(skip(state, request), fields(model = %request.model, stream = request.stream))]
pub async fn chat_completions<T>(
    State(state): State<AppState<T>>,
    Json(request): Json<ChatCompletionRequest>,
) -> Result<Response, ProxyError>
where
    T: HttpClient + Clone + Send + Sync + 'static,
{
    run_completion(state, None, request).await
}

/// `POST /v1/chat/completions/{conversation_id}`: the stateful path. The
/// backend session is reused across calls with the same conversation id.
#[instrument(skip(state, request), fields(model = %request.model, stream = request.stream))]
pub async fn stateful_chat_completions<T>(
    State(state): State<AppState<T>>,
    Path(conversation_id): Path<String>,
    Json(request): Json<ChatCompletionRequest>,
) -> Result<Response, ProxyError>
where
    T: HttpClient + Clone + Send + Sync + 'static,
{
    run_completion(state, Some(conversation_id), request).await
}

async fn run_completion<T>(
    state: AppState<T>,
    conversation_id: Option<String>,
    request: ChatCompletionRequest,
) -> Result<Response, ProxyError>
where
    T: HttpClient + Clone + Send + Sync + 'static,
{
    // Validate shape before touching the backend: unknown models and
    // requests without a user message must not allocate sessions.
    let payload = translate::prepare(&state.models, &request)?;

    let token = state.tokens.next().await;
    let session_id = state
        .sessions
        .resolve(
            conversation_id.as_deref(),
            &state.http_client,
            &state.base_url,
            &token,
        )
        .await?;
    info!("running completion against backend session {session_id}");

    let stream = translate::completion_stream(
        state.http_client.clone(),
        state.base_url.clone(),
        token,
        session_id.clone(),
        request.model.clone(),
        payload,
    );

    if request.stream {
        let body = Body::from_stream(stream.map(Ok::<_, Infallible>));
        let response = Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache")
            .body(body)
            .map_err(|e| ProxyError::Upstream(format!("building stream response: {e}")))?;
        Ok(response)
    } else {
        let response = translate::aggregate(stream, &session_id, &request.model).await?;
        Ok(Json(response).into_response())
    }
}
