//! Standard chat request → native request

use super::native::{NativeDebug, NativeInput, NativeMessage, NativeParameters, NativeRequest};
use crate::handlers::openai::types::{ChatCompletionRequest, MessageRole};

/// Translate a validated chat request into the native request body
///
/// A lone user message becomes `input.prompt`; anything else is sent as
/// `input.messages` in the original order.
pub fn to_native(request: &ChatCompletionRequest) -> NativeRequest {
    let input = match request.messages() {
        [only] if only.role() == MessageRole::User => NativeInput::Prompt(only.content().to_string()),
        messages => NativeInput::Messages(
            messages
                .iter()
                .map(|m| NativeMessage {
                    role: m.role().as_str().to_string(),
                    content: m.content().to_string(),
                    name: m.name().map(str::to_string),
                })
                .collect(),
        ),
    };

    NativeRequest {
        input,
        parameters: NativeParameters {
            temperature: request.temperature(),
            top_p: request.top_p(),
            max_tokens: request.max_tokens(),
            stop: request.stop().to_vec(),
            presence_penalty: request.presence_penalty(),
            frequency_penalty: request.frequency_penalty(),
        },
        debug: NativeDebug::default(),
    }
}
