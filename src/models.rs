/// Wire shapes for the OpenAI-compatible surface, plus the static model map.
///
/// The request/response types mirror the OpenAI chat-completion schema
/// closely enough for standard clients. Usage counters are always
/// zero-filled; no token accounting is performed by the gateway.
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch, for `created` fields.
pub(crate) fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// A single chat message. Roles are the usual "user"/"assistant"/"system".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: String,
    pub content: String,
}

/// The caller's completion request. Unknown fields are ignored; the only
/// shape checks performed are the ones the translator needs.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub stream: bool,
}

/// One entry in the `/v1/models` listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelCard {
    pub id: String,
    pub object: String,
    pub created: u64,
    pub owned_by: String,
}

impl ModelCard {
    fn new(id: &str) -> Self {
        ModelCard {
            id: id.to_owned(),
            object: "model".into(),
            created: unix_timestamp(),
            owned_by: "kimi.ai".into(),
        }
    }
}

/// The `/v1/models` response body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelList {
    pub object: String,
    pub data: Vec<ModelCard>,
}

impl ModelList {
    pub fn from_map(models: &ModelMap) -> Self {
        let data = models.ids().map(ModelCard::new).collect();
        ModelList {
            object: "list".into(),
            data,
        }
    }
}

/// Zero-filled token usage. The Kimi backend does not report usable counts.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionChoice {
    pub index: u32,
    pub message: Message,
    pub finish_reason: Option<String>,
}

/// The non-streaming completion response: a single aggregated choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: String,
    pub created: u64,
    pub model: String,
    pub choices: Vec<ChatCompletionChoice>,
    pub usage: Usage,
}

impl ChatCompletionResponse {
    /// Wraps aggregated assistant text in a complete response object.
    pub fn assistant(id: &str, model: &str, content: String) -> Self {
        ChatCompletionResponse {
            id: id.to_owned(),
            object: "chat.completion".into(),
            created: unix_timestamp(),
            model: model.to_owned(),
            choices: vec![ChatCompletionChoice {
                index: 0,
                message: Message {
                    role: "assistant".into(),
                    content,
                },
                finish_reason: Some("stop".into()),
            }],
            usage: Usage::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeltaMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: DeltaMessage,
    pub finish_reason: Option<String>,
}

/// One streaming chunk in the OpenAI `chat.completion.chunk` dialect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: String,
    pub created: u64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
}

impl ChatCompletionChunk {
    fn new(id: &str, model: &str, delta: DeltaMessage, finish_reason: Option<String>) -> Self {
        ChatCompletionChunk {
            id: id.to_owned(),
            object: "chat.completion.chunk".into(),
            created: unix_timestamp(),
            model: model.to_owned(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
        }
    }

    /// A chunk carrying translated content from the backend.
    pub fn content(id: &str, model: &str, content: String) -> Self {
        let delta = DeltaMessage {
            role: None,
            content: Some(content),
        };
        Self::new(id, model, delta, None)
    }

    /// The final chunk emitted when the backend signals completion.
    pub fn finish(id: &str, model: &str) -> Self {
        Self::new(id, model, DeltaMessage::default(), Some("stop".into()))
    }
}

/// Backend parameters for one caller-visible model id.
#[derive(Debug, Clone)]
pub struct ModelTarget {
    /// The model name sent to the Kimi completion endpoint.
    pub backend_model: String,
    /// Whether backend-side search augmentation is requested.
    pub use_search: bool,
}

/// The fixed map from caller-visible model ids to backend parameters.
/// Requests naming any other model are rejected with 404 before any
/// backend call is made.
#[derive(Debug, Clone)]
pub struct ModelMap {
    entries: HashMap<String, ModelTarget>,
}

impl ModelMap {
    /// The supported Kimi models.
    pub fn builtin() -> Self {
        let mut entries = HashMap::new();
        for id in ["k2", "k1.5"] {
            entries.insert(
                id.to_owned(),
                ModelTarget {
                    backend_model: id.to_owned(),
                    use_search: true,
                },
            );
        }
        ModelMap { entries }
    }

    pub fn get(&self, id: &str) -> Option<&ModelTarget> {
        self.entries.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_map_contains_supported_models() {
        let models = ModelMap::builtin();
        assert!(models.get("k2").is_some());
        assert!(models.get("k1.5").is_some());
        assert!(models.get("gpt-4").is_none());
        let target = models.get("k2").unwrap();
        assert_eq!(target.backend_model, "k2");
        assert!(target.use_search);
    }

    #[test]
    fn model_list_exposes_map_keys() {
        let list = ModelList::from_map(&ModelMap::builtin());
        assert_eq!(list.object, "list");
        assert_eq!(list.data.len(), 2);
        let ids: Vec<&str> = list.data.iter().map(|m| m.id.as_str()).collect();
        assert!(ids.contains(&"k2"));
        assert!(ids.contains(&"k1.5"));
        for card in &list.data {
            assert_eq!(card.object, "model");
            assert_eq!(card.owned_by, "kimi.ai");
        }
    }

    #[test]
    fn stream_defaults_to_false() {
        let request: ChatCompletionRequest = serde_json::from_value(serde_json::json!({
            "model": "k2",
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .unwrap();
        assert!(!request.stream);
    }

    #[test]
    fn finish_chunk_serializes_empty_delta() {
        let chunk = ChatCompletionChunk::finish("chat-1", "k2");
        let value = serde_json::to_value(&chunk).unwrap();
        assert_eq!(value["object"], "chat.completion.chunk");
        assert_eq!(value["choices"][0]["finish_reason"], "stop");
        assert_eq!(value["choices"][0]["delta"], serde_json::json!({}));
    }

    #[test]
    fn aggregated_response_is_zero_usage() {
        let response = ChatCompletionResponse::assistant("chat-1", "k2", "hello".into());
        assert_eq!(response.usage, Usage::default());
        assert_eq!(response.choices[0].message.content, "hello");
        assert_eq!(response.choices[0].finish_reason.as_deref(), Some("stop"));
    }
}
