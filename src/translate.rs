//! The stream translator: Kimi pseudo-SSE in, OpenAI chunk SSE out.
//!
//! The translator validates the caller's request, opens the backend
//! completion stream, filters it to content-bearing (`event == "cmpl"`)
//! records, and re-frames each one as an OpenAI `chat.completion.chunk`
//! event. Once streaming has begun it never raises: any transport failure
//! becomes one in-band error event followed by the `[DONE]` marker. A
//! non-streaming request drives the same stream and aggregates the deltas
//! into a single `chat.completion` object.
use crate::client::HttpClient;
use crate::errors::ProxyError;
use crate::models::{ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, ModelMap};
use crate::sse::DataFrames;
use crate::upstream;
use axum::body::BodyDataStream;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::collections::VecDeque;
use tracing::{debug, error};
use url::Url;

const DONE_SENTINEL: &str = "[DONE]";
/// The backend event type that carries completion text. Everything else
/// (metadata, search progress, ping) is dropped.
const CONTENT_EVENT: &str = "cmpl";

/// The subset of a backend record the translator inspects.
#[derive(Debug, Deserialize)]
struct KimiEvent {
    #[serde(default)]
    event: String,
    #[serde(default)]
    text: String,
}

/// Validates the request against the model map and builds the backend
/// completion payload. Only the most recent "user" message is forwarded;
/// prior history and system messages are not relayed.
pub fn prepare(
    models: &ModelMap,
    request: &ChatCompletionRequest,
) -> Result<serde_json::Value, ProxyError> {
    let target = models
        .get(&request.model)
        .ok_or_else(|| ProxyError::UnknownModel(request.model.clone()))?;

    let user_message = request
        .messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .map(|m| m.content.clone())
        .ok_or(ProxyError::MissingUserMessage)?;

    Ok(json!({
        "model": target.backend_model,
        "use_search": target.use_search,
        "messages": [{"role": "user", "content": user_message}],
        "kimiplus_id": "kimi",
        "extend": {"sidebar": true},
        "refs": [],
        "history": [],
        "scene_labels": [],
        "use_semantic_memory": false,
        "use_deep_research": false,
    }))
}

/// Frames a serializable value as one SSE event.
fn sse_json_frame<S: serde::Serialize>(value: &S) -> Bytes {
    let json = serde_json::to_string(value).expect("chunk serializes to JSON");
    Bytes::from(format!("data: {json}\n\n"))
}

fn done_frame() -> Bytes {
    Bytes::from_static(b"data: [DONE]\n\n")
}

/// The best-effort tail emitted when the backend call fails: one structured
/// error event, then the terminal marker.
fn error_frames() -> VecDeque<Bytes> {
    let event = json!({
        "error": {
            "message": "An internal error occurred in the streaming proxy.",
            "type": "proxy_error",
        }
    });
    VecDeque::from([sse_json_frame(&event), done_frame()])
}

enum Relay<T: HttpClient> {
    /// The backend POST has not been issued yet. Connecting inside the
    /// stream keeps even connect failures in-band, since the caller's
    /// response has already committed to `text/event-stream`.
    Connect {
        client: T,
        base_url: Url,
        token: String,
        session_id: String,
        model: String,
        payload: serde_json::Value,
    },
    /// Relaying parsed backend records.
    Open {
        frames: DataFrames<BodyDataStream>,
        session_id: String,
        model: String,
    },
    /// Flushing queued terminal frames; the backend connection is gone.
    Drain(VecDeque<Bytes>),
}

async fn relay_step<T: HttpClient>(mut state: Relay<T>) -> Option<(Bytes, Relay<T>)> {
    loop {
        state = match state {
            Relay::Connect {
                client,
                base_url,
                token,
                session_id,
                model,
                payload,
            } => {
                match upstream::open_completion_stream(&client, &base_url, &token, &session_id, &payload)
                    .await
                {
                    Ok(response) => Relay::Open {
                        frames: DataFrames::new(response.into_body().into_data_stream()),
                        session_id,
                        model,
                    },
                    Err(detail) => {
                        error!("failed to open completion stream: {detail}");
                        Relay::Drain(error_frames())
                    }
                }
            }
            Relay::Open {
                mut frames,
                session_id,
                model,
            } => match frames.next().await {
                Some(Ok(payload)) => {
                    if payload == DONE_SENTINEL {
                        // Stop reading; dropping `frames` releases the
                        // backend connection.
                        let finish = ChatCompletionChunk::finish(&session_id, &model);
                        return Some((
                            sse_json_frame(&finish),
                            Relay::Drain(VecDeque::from([done_frame()])),
                        ));
                    }
                    match serde_json::from_str::<KimiEvent>(&payload) {
                        Ok(event) if event.event == CONTENT_EVENT && !event.text.is_empty() => {
                            let chunk =
                                ChatCompletionChunk::content(&session_id, &model, event.text);
                            return Some((
                                sse_json_frame(&chunk),
                                Relay::Open {
                                    frames,
                                    session_id,
                                    model,
                                },
                            ));
                        }
                        Ok(event) => {
                            debug!("dropping backend event type {:?}", event.event);
                            Relay::Open {
                                frames,
                                session_id,
                                model,
                            }
                        }
                        // Malformed payloads are skipped; forward progress
                        // matters more than strict validation here.
                        Err(_) => Relay::Open {
                            frames,
                            session_id,
                            model,
                        },
                    }
                }
                Some(Err(e)) => {
                    error!("completion stream failed mid-flight: {e}");
                    Relay::Drain(error_frames())
                }
                None => return None,
            },
            Relay::Drain(mut queue) => {
                return queue.pop_front().map(|frame| (frame, Relay::Drain(queue)));
            }
        }
    }
}

/// Runs the backend completion for one request, yielding ready-to-send SSE
/// frames in the OpenAI chunk dialect.
pub fn completion_stream<T>(
    client: T,
    base_url: Url,
    token: String,
    session_id: String,
    model: String,
    payload: serde_json::Value,
) -> impl Stream<Item = Bytes> + Send
where
    T: HttpClient + Send + Sync + 'static,
{
    futures_util::stream::unfold(
        Relay::Connect {
            client,
            base_url,
            token,
            session_id,
            model,
            payload,
        },
        relay_step,
    )
}

/// Collects a chunk stream into one non-streaming completion response.
///
/// Each frame is parsed back out of its own SSE framing. An embedded error
/// event aborts with a 500-mapped error, since nothing has been sent to the
/// caller yet; otherwise delta contents are concatenated in order.
pub async fn aggregate(
    stream: impl Stream<Item = Bytes>,
    session_id: &str,
    model: &str,
) -> Result<ChatCompletionResponse, ProxyError> {
    futures_util::pin_mut!(stream);

    let mut content = String::new();
    while let Some(frame) = stream.next().await {
        let text = String::from_utf8_lossy(&frame);
        let Some(payload) = text.strip_prefix("data:").map(str::trim) else {
            continue;
        };
        if payload == DONE_SENTINEL {
            break;
        }
        let Ok(value) = serde_json::from_str::<serde_json::Value>(payload) else {
            continue;
        };
        if let Some(err) = value.get("error") {
            let message = err
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("upstream stream failed")
                .to_owned();
            return Err(ProxyError::Upstream(message));
        }
        if let Some(delta) = value
            .pointer("/choices/0/delta/content")
            .and_then(|c| c.as_str())
        {
            content.push_str(delta);
        }
    }

    Ok(ChatCompletionResponse::assistant(session_id, model, content))
}
