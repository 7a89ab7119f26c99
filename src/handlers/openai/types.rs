//! OpenAI-compatible request and response types
//!
//! These types follow the OpenAI Chat Completions API wire format: requests
//! coming in from callers, and the responses, stream chunks and error envelopes
//! going back out.

use serde::{Deserialize, Deserializer, Serialize};

// =============================================================================
// OpenAI API Object Type Constants
// =============================================================================

/// Object type for non-streaming chat completion responses
pub const OBJECT_CHAT_COMPLETION: &str = "chat.completion";
/// Object type for streaming chat completion chunks
pub const OBJECT_CHAT_COMPLETION_CHUNK: &str = "chat.completion.chunk";
/// Finish reason used when the upstream does not report one
pub const DEFAULT_FINISH_REASON: &str = "stop";

/// Treat an explicit JSON `null` the same as a missing field
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// `stop` may be a single string or a list of strings
fn stop_sequences<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Stop {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<Stop>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(Stop::One(s)) => vec![s],
        Some(Stop::Many(v)) => v,
    })
}

// =============================================================================
// Chat Messages
// =============================================================================

/// Role of a message author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A single conversation turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    role: MessageRole,
    #[serde(default, deserialize_with = "null_as_default")]
    content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

impl ChatMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn role(&self) -> MessageRole {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Author name, if present and non-empty
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref().filter(|n| !n.is_empty())
    }
}

// =============================================================================
// Chat Completion Request
// =============================================================================

/// OpenAI-compatible chat completion request
///
/// Unrecognized fields are ignored. Validation beyond JSON shape happens in
/// [`ChatCompletionRequest::validate`] so the handler can reject bad requests
/// with a 400 before anything is sent upstream.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatCompletionRequest {
    #[serde(default)]
    model: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    messages: Vec<ChatMessage>,
    #[serde(default, deserialize_with = "null_as_default")]
    stream: bool,
    #[serde(default)]
    temperature: Option<f64>,
    #[serde(default)]
    top_p: Option<f64>,
    #[serde(default)]
    max_tokens: Option<u32>,
    #[serde(default)]
    presence_penalty: Option<f64>,
    #[serde(default)]
    frequency_penalty: Option<f64>,
    #[serde(default, deserialize_with = "stop_sequences")]
    stop: Vec<String>,
    #[serde(default)]
    user: Option<String>,
}

/// Builder for constructing requests programmatically
#[derive(Debug, Default)]
pub struct ChatCompletionRequestBuilder {
    request: ChatCompletionRequest,
}

impl ChatCompletionRequestBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.request.model = Some(model.into());
        self
    }

    pub fn message(mut self, message: ChatMessage) -> Self {
        self.request.messages.push(message);
        self
    }

    pub fn system_message(self, content: impl Into<String>) -> Self {
        self.message(ChatMessage::new(MessageRole::System, content))
    }

    pub fn user_message(self, content: impl Into<String>) -> Self {
        self.message(ChatMessage::new(MessageRole::User, content))
    }

    pub fn assistant_message(self, content: impl Into<String>) -> Self {
        self.message(ChatMessage::new(MessageRole::Assistant, content))
    }

    pub fn stream(mut self, stream: bool) -> Self {
        self.request.stream = stream;
        self
    }

    pub fn temperature(mut self, temperature: f64) -> Self {
        self.request.temperature = Some(temperature);
        self
    }

    pub fn top_p(mut self, top_p: f64) -> Self {
        self.request.top_p = Some(top_p);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.request.max_tokens = Some(max_tokens);
        self
    }

    pub fn presence_penalty(mut self, presence_penalty: f64) -> Self {
        self.request.presence_penalty = Some(presence_penalty);
        self
    }

    pub fn frequency_penalty(mut self, frequency_penalty: f64) -> Self {
        self.request.frequency_penalty = Some(frequency_penalty);
        self
    }

    pub fn stop(mut self, stop: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.request.stop = stop.into_iter().map(Into::into).collect();
        self
    }

    /// Build the request, performing validation
    ///
    /// # Errors
    /// Returns an error string if validation fails (same rules as the handler)
    pub fn build(self) -> Result<ChatCompletionRequest, String> {
        self.request.validate()?;
        Ok(self.request)
    }
}

impl ChatCompletionRequest {
    pub fn builder() -> ChatCompletionRequestBuilder {
        ChatCompletionRequestBuilder::default()
    }

    /// Check invariants that JSON shape alone cannot express
    pub fn validate(&self) -> Result<(), String> {
        if self.messages.is_empty() {
            return Err("messages must not be empty".to_string());
        }
        Ok(())
    }

    /// Requested model name, if the caller sent a non-empty one
    pub fn model(&self) -> Option<&str> {
        self.model.as_deref().filter(|m| !m.is_empty())
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn stream(&self) -> bool {
        self.stream
    }

    pub fn temperature(&self) -> Option<f64> {
        self.temperature
    }

    pub fn top_p(&self) -> Option<f64> {
        self.top_p
    }

    pub fn max_tokens(&self) -> Option<u32> {
        self.max_tokens
    }

    pub fn presence_penalty(&self) -> Option<f64> {
        self.presence_penalty
    }

    pub fn frequency_penalty(&self) -> Option<f64> {
        self.frequency_penalty
    }

    pub fn stop(&self) -> &[String] {
        &self.stop
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }
}

// =============================================================================
// Chat Completion Response (Non-Streaming)
// =============================================================================

/// Usage statistics for a chat completion response.
///
/// Fields are private to enforce the invariant that `total_tokens` always
/// equals `prompt_tokens + completion_tokens`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

impl Usage {
    /// Create usage stats from token counts.
    #[inline]
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }

    pub fn zero() -> Self {
        Self::new(0, 0)
    }

    #[inline]
    pub fn prompt_tokens(&self) -> u32 {
        self.prompt_tokens
    }

    #[inline]
    pub fn completion_tokens(&self) -> u32 {
        self.completion_tokens
    }

    #[inline]
    pub fn total_tokens(&self) -> u32 {
        self.total_tokens
    }
}

/// Assistant message in response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub role: MessageRole,
    pub content: String,
}

impl AssistantMessage {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}

/// A single choice in the response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub message: AssistantMessage,
    pub finish_reason: String,
}

/// OpenAI-compatible chat completion response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletion {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<Choice>,
    pub usage: Usage,
}

impl ChatCompletion {
    /// Single-choice assistant completion
    pub fn new(
        id: String,
        model: String,
        created: i64,
        content: String,
        finish_reason: String,
        usage: Usage,
    ) -> Self {
        Self {
            id,
            object: OBJECT_CHAT_COMPLETION.to_string(),
            created,
            model,
            choices: vec![Choice {
                index: 0,
                message: AssistantMessage::new(content),
                finish_reason,
            }],
            usage,
        }
    }
}

/// Fresh completion id for responses the upstream did not identify
pub fn generate_completion_id() -> String {
    format!("chatcmpl-{}", uuid::Uuid::new_v4().simple())
}

/// Get the current Unix timestamp for response creation.
///
/// If the system clock is before UNIX epoch, returns 0 and logs a warning.
pub fn current_timestamp() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_else(|e| {
            tracing::warn!(
                error = %e,
                "System clock appears to be before UNIX epoch - using 0 as timestamp"
            );
            0
        })
}

// =============================================================================
// Chat Completion Chunk (Streaming)
// =============================================================================

/// Delta content in a streaming chunk
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Delta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// A single choice in a streaming chunk
///
/// `finish_reason` is serialized as `null` on content chunks, as OpenAI does.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: Delta,
    pub finish_reason: Option<String>,
}

/// OpenAI-compatible streaming chunk
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl ChatCompletionChunk {
    /// Create a content chunk
    pub fn content(id: &str, model: &str, created: i64, content: &str) -> Self {
        Self {
            id: id.to_string(),
            object: OBJECT_CHAT_COMPLETION_CHUNK.to_string(),
            created,
            model: model.to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: Delta {
                    content: Some(content.to_string()),
                },
                finish_reason: None,
            }],
            usage: None,
        }
    }

    /// Create a terminal chunk: empty delta, the reported finish reason, and
    /// usage when the upstream supplied it
    pub fn finish(
        id: &str,
        model: &str,
        created: i64,
        finish_reason: &str,
        usage: Option<Usage>,
    ) -> Self {
        Self {
            id: id.to_string(),
            object: OBJECT_CHAT_COMPLETION_CHUNK.to_string(),
            created,
            model: model.to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: Delta::default(),
                finish_reason: Some(finish_reason.to_string()),
            }],
            usage,
        }
    }

    /// Delta text carried by this chunk, if any
    pub fn delta_content(&self) -> Option<&str> {
        self.choices.first().and_then(|c| c.delta.content.as_deref())
    }

    pub fn finish_reason(&self) -> Option<&str> {
        self.choices.first().and_then(|c| c.finish_reason.as_deref())
    }
}

// =============================================================================
// Error Envelope
// =============================================================================

/// OpenAI-compatible error response structure
///
/// ```json
/// {"error": {"message": "...", "type": "invalid_request_error", "code": "..."}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ErrorEnvelope {
    pub fn new(message: impl Into<String>, error_type: impl Into<String>) -> Self {
        Self {
            error: ErrorBody {
                message: message.into(),
                error_type: error_type.into(),
                code: None,
            },
        }
    }

    /// Attach an error code; empty codes are dropped
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        let code = code.into();
        self.error.code = (!code.is_empty()).then_some(code);
        self
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // -------------------------------------------------------------------------
    // Request Deserialization Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_request_deserializes_full_shape() {
        let request: ChatCompletionRequest = serde_json::from_value(json!({
            "model": "qwen-agent",
            "messages": [
                {"role": "system", "content": "Be brief."},
                {"role": "user", "content": "hi", "name": "alice"}
            ],
            "temperature": 0.5,
            "top_p": 0.9,
            "max_tokens": 100,
            "stream": true,
            "presence_penalty": 0.1,
            "frequency_penalty": -0.1,
            "stop": ["\n\n", "END"],
            "user": "u-1"
        }))
        .unwrap();

        assert_eq!(request.model(), Some("qwen-agent"));
        assert_eq!(request.messages().len(), 2);
        assert_eq!(request.messages()[1].name(), Some("alice"));
        assert_eq!(request.temperature(), Some(0.5));
        assert_eq!(request.top_p(), Some(0.9));
        assert_eq!(request.max_tokens(), Some(100));
        assert!(request.stream());
        assert_eq!(request.presence_penalty(), Some(0.1));
        assert_eq!(request.frequency_penalty(), Some(-0.1));
        assert_eq!(request.stop(), ["\n\n".to_string(), "END".to_string()]);
        assert_eq!(request.user(), Some("u-1"));
    }

    #[test]
    fn test_request_ignores_unknown_fields() {
        let request: ChatCompletionRequest = serde_json::from_value(json!({
            "messages": [{"role": "user", "content": "hi"}],
            "functions": [{"name": "f"}],
            "logit_bias": {"1": 2}
        }))
        .unwrap();
        assert_eq!(request.messages().len(), 1);
    }

    #[test]
    fn test_request_missing_optional_fields_default() {
        let request: ChatCompletionRequest =
            serde_json::from_value(json!({"messages": [{"role": "user", "content": "hi"}]}))
                .unwrap();
        assert_eq!(request.model(), None);
        assert!(!request.stream());
        assert!(request.temperature().is_none());
        assert!(request.stop().is_empty());
    }

    #[test]
    fn test_request_missing_messages_fails_validation_not_parsing() {
        let request: ChatCompletionRequest =
            serde_json::from_value(json!({"model": "m"})).unwrap();
        assert_eq!(
            request.validate().unwrap_err(),
            "messages must not be empty"
        );
    }

    #[test]
    fn test_request_stop_accepts_single_string() {
        let request: ChatCompletionRequest = serde_json::from_value(json!({
            "messages": [{"role": "user", "content": "hi"}],
            "stop": "END"
        }))
        .unwrap();
        assert_eq!(request.stop(), ["END".to_string()]);
    }

    #[test]
    fn test_request_null_stream_and_content() {
        let request: ChatCompletionRequest = serde_json::from_value(json!({
            "messages": [{"role": "assistant", "content": null}],
            "stream": null
        }))
        .unwrap();
        assert!(!request.stream());
        assert_eq!(request.messages()[0].content(), "");
    }

    #[test]
    fn test_request_rejects_unknown_role() {
        let result = serde_json::from_value::<ChatCompletionRequest>(json!({
            "messages": [{"role": "wizard", "content": "hi"}]
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_model_is_treated_as_absent() {
        let request: ChatCompletionRequest = serde_json::from_value(json!({
            "model": "",
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .unwrap();
        assert_eq!(request.model(), None);
    }

    #[test]
    fn test_empty_name_is_treated_as_absent() {
        let msg = ChatMessage::new(MessageRole::User, "hi").with_name("");
        assert_eq!(msg.name(), None);
    }

    #[test]
    fn test_builder_rejects_empty_messages() {
        assert!(ChatCompletionRequest::builder().build().is_err());
        assert!(
            ChatCompletionRequest::builder()
                .user_message("hi")
                .build()
                .is_ok()
        );
    }

    // -------------------------------------------------------------------------
    // Response Serialization Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_usage_total_is_sum() {
        let usage = Usage::new(3, 1);
        assert_eq!(usage.total_tokens(), 4);
        assert_eq!(Usage::zero().total_tokens(), 0);
    }

    #[test]
    fn test_completion_serializes_openai_shape() {
        let completion = ChatCompletion::new(
            "r1".to_string(),
            "m".to_string(),
            42,
            "hello".to_string(),
            "stop".to_string(),
            Usage::new(3, 1),
        );
        let value = serde_json::to_value(&completion).unwrap();
        assert_eq!(
            value,
            json!({
                "id": "r1",
                "object": "chat.completion",
                "created": 42,
                "model": "m",
                "choices": [{
                    "index": 0,
                    "message": {"role": "assistant", "content": "hello"},
                    "finish_reason": "stop"
                }],
                "usage": {"prompt_tokens": 3, "completion_tokens": 1, "total_tokens": 4}
            })
        );
    }

    #[test]
    fn test_content_chunk_has_null_finish_reason_and_no_usage() {
        let chunk = ChatCompletionChunk::content("id", "m", 1, "Hi");
        let value = serde_json::to_value(&chunk).unwrap();
        assert_eq!(value["object"], "chat.completion.chunk");
        assert_eq!(value["choices"][0]["delta"]["content"], "Hi");
        assert!(value["choices"][0]["finish_reason"].is_null());
        assert!(value["choices"][0].get("finish_reason").is_some());
        assert!(value.get("usage").is_none());
    }

    #[test]
    fn test_finish_chunk_has_empty_delta() {
        let chunk = ChatCompletionChunk::finish("id", "m", 1, "stop", Some(Usage::new(2, 3)));
        let value = serde_json::to_value(&chunk).unwrap();
        assert_eq!(value["choices"][0]["delta"], json!({}));
        assert_eq!(value["choices"][0]["finish_reason"], "stop");
        assert_eq!(value["usage"]["total_tokens"], 5);
    }

    #[test]
    fn test_generated_completion_ids_are_unique() {
        let a = generate_completion_id();
        let b = generate_completion_id();
        assert!(a.starts_with("chatcmpl-"));
        assert_ne!(a, b);
    }

    // -------------------------------------------------------------------------
    // Error Envelope Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_error_envelope_omits_missing_code() {
        let env = ErrorEnvelope::new("bad", "invalid_request_error");
        assert_eq!(
            serde_json::to_value(&env).unwrap(),
            json!({"error": {"message": "bad", "type": "invalid_request_error"}})
        );
    }

    #[test]
    fn test_error_envelope_with_code() {
        let env = ErrorEnvelope::new("slow down", "rate_limit_error").with_code("Throttling");
        assert_eq!(env.error.code.as_deref(), Some("Throttling"));
        let env = ErrorEnvelope::new("x", "api_error").with_code("");
        assert!(env.error.code.is_none());
    }
}
