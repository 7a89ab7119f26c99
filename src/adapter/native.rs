//! Native agent-completion wire types
//!
//! Request types only serialize fields that were explicitly set. Response
//! types default every field, missing or `null`, so partially populated
//! upstream bodies still parse.

use crate::handlers::openai::types::null_as_default;
use serde::{Deserialize, Serialize};

/// Request body for the native completion endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NativeRequest {
    pub input: NativeInput,
    /// Always present, possibly empty
    pub parameters: NativeParameters,
    /// Always sent as `{}`
    pub debug: NativeDebug,
}

/// Either a bare prompt or an ordered message list, never both
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NativeInput {
    Prompt(String),
    Messages(Vec<NativeMessage>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NativeMessage {
    pub role: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Sampling parameters; absent fields are omitted from the body
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NativeParameters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NativeDebug {}

/// Response body (buffered) or a single stream frame
///
/// In stream frames `output.text` holds everything generated so far.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NativeResponse {
    #[serde(deserialize_with = "null_as_default")]
    pub output: NativeOutput,
    #[serde(deserialize_with = "null_as_default")]
    pub usage: NativeUsage,
    #[serde(deserialize_with = "null_as_default")]
    pub request_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NativeOutput {
    /// `None`, `""` and `"null"` all mean "not finished"
    pub finish_reason: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub text: String,
    #[serde(deserialize_with = "null_as_default")]
    pub session_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NativeUsage {
    #[serde(deserialize_with = "null_as_default")]
    pub models: Vec<NativeModelUsage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NativeModelUsage {
    #[serde(deserialize_with = "null_as_default")]
    pub input_tokens: u32,
    #[serde(deserialize_with = "null_as_default")]
    pub output_tokens: u32,
    #[serde(deserialize_with = "null_as_default")]
    pub model_id: String,
}

/// Error body reported by the native endpoint
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NativeError {
    #[serde(deserialize_with = "null_as_default")]
    pub code: String,
    #[serde(deserialize_with = "null_as_default")]
    pub message: String,
    #[serde(deserialize_with = "null_as_default")]
    pub request_id: String,
}

impl NativeResponse {
    /// Id to report for this exchange: request id, else session id
    pub fn response_id(&self) -> Option<&str> {
        [self.request_id.as_str(), self.output.session_id.as_str()]
            .into_iter()
            .find(|id| !id.is_empty())
    }

    /// Reported finish reason, ignoring the empty and `"null"` placeholders
    pub fn finish_reason(&self) -> Option<&str> {
        self.output
            .finish_reason
            .as_deref()
            .filter(|r| !r.is_empty() && *r != "null")
    }

    /// Usage from the first reported model entry
    pub fn first_model_usage(&self) -> Option<&NativeModelUsage> {
        self.usage.models.first()
    }
}
