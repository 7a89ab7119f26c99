//! Native buffered response → standard chat completion

use super::native::NativeResponse;
use crate::handlers::openai::types::{
    ChatCompletion, DEFAULT_FINISH_REASON, Usage, current_timestamp, generate_completion_id,
};

/// Translate a buffered native response body
///
/// # Errors
///
/// Returns the parse error when the body is not a native response; the
/// caller forwards the raw body in that case.
pub fn to_openai(body: &[u8], model: &str) -> Result<ChatCompletion, serde_json::Error> {
    let native: NativeResponse = serde_json::from_slice(body)?;

    let usage = native
        .first_model_usage()
        .map(|u| Usage::new(u.input_tokens, u.output_tokens))
        .unwrap_or_else(Usage::zero);

    let id = native
        .response_id()
        .map(str::to_string)
        .unwrap_or_else(generate_completion_id);

    let finish_reason = native
        .output
        .finish_reason
        .as_deref()
        .filter(|r| !r.is_empty())
        .unwrap_or(DEFAULT_FINISH_REASON)
        .to_string();

    Ok(ChatCompletion::new(
        id,
        model.to_string(),
        current_timestamp(),
        native.output.text,
        finish_reason,
        usage,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn translates_complete_response() {
        let body = br#"{"output":{"text":"hello","finish_reason":"stop"},"usage":{"models":[{"input_tokens":3,"output_tokens":1}]},"request_id":"r1"}"#;
        let completion = to_openai(body, "bailian-agent").unwrap();

        assert_eq!(completion.id, "r1");
        assert_eq!(completion.object, "chat.completion");
        assert_eq!(completion.model, "bailian-agent");
        assert_eq!(completion.choices.len(), 1);
        assert_eq!(completion.choices[0].message.content(), "hello");
        assert_eq!(completion.choices[0].finish_reason, "stop");
        assert_eq!(completion.usage, Usage::new(3, 1));
    }

    #[test]
    fn missing_finish_reason_defaults_to_stop() {
        let completion = to_openai(br#"{"output":{"text":"x"},"request_id":"r"}"#, "m").unwrap();
        assert_eq!(completion.choices[0].finish_reason, "stop");
    }

    #[test]
    fn missing_usage_reports_zero() {
        let completion = to_openai(br#"{"output":{"text":"x"},"request_id":"r"}"#, "m").unwrap();
        assert_eq!(completion.usage, Usage::zero());
    }

    #[test]
    fn usage_comes_from_first_model_only() {
        let body = br#"{"output":{"text":"x"},"usage":{"models":[
            {"input_tokens":5,"output_tokens":2,"model_id":"a"},
            {"input_tokens":100,"output_tokens":100,"model_id":"b"}
        ]}}"#;
        let completion = to_openai(body, "m").unwrap();
        assert_eq!(completion.usage.total_tokens(), 7);
    }

    #[test]
    fn missing_ids_generate_fallback() {
        let completion = to_openai(br#"{"output":{"text":"x"}}"#, "m").unwrap();
        assert!(completion.id.starts_with("chatcmpl-"));
    }

    #[test]
    fn session_id_used_without_request_id() {
        let completion =
            to_openai(br#"{"output":{"text":"x","session_id":"s9"}}"#, "m").unwrap();
        assert_eq!(completion.id, "s9");
    }

    #[test]
    fn explicit_nulls_still_translate() {
        let body = br#"{"output":{"text":"hello","finish_reason":"stop","session_id":null},"usage":{"models":[{"input_tokens":3,"output_tokens":1,"model_id":null}]},"request_id":"r1"}"#;
        let completion = to_openai(body, "m").unwrap();
        assert_eq!(completion.id, "r1");
        assert_eq!(completion.choices[0].message.content(), "hello");
        assert_eq!(completion.usage, Usage::new(3, 1));

        let body = br#"{"output":{"text":"hello","finish_reason":null,"session_id":null},"usage":null,"request_id":null}"#;
        let completion = to_openai(body, "m").unwrap();
        assert!(completion.id.starts_with("chatcmpl-"));
        assert_eq!(completion.choices[0].finish_reason, "stop");
        assert_eq!(completion.usage, Usage::zero());
    }

    #[test]
    fn non_json_body_is_an_error() {
        assert!(to_openai(b"<html>bad gateway</html>", "m").is_err());
        assert!(to_openai(br#"{"output":"not an object"}"#, "m").is_err());
    }

    proptest! {
        #[test]
        fn content_and_token_totals_survive(
            text in ".{0,64}",
            reason in prop_oneof![Just(String::new()), Just("stop".to_string()), Just("length".to_string())],
            input in 0u32..100_000,
            output in 0u32..100_000,
        ) {
            let body = serde_json::json!({
                "output": {"text": text, "finish_reason": reason},
                "usage": {"models": [{"input_tokens": input, "output_tokens": output}]},
                "request_id": "r"
            });
            let completion = to_openai(body.to_string().as_bytes(), "m").unwrap();

            prop_assert_eq!(completion.choices[0].message.content(), text.as_str());
            let expected = if reason.is_empty() { "stop" } else { reason.as_str() };
            prop_assert_eq!(completion.choices[0].finish_reason.as_str(), expected);
            prop_assert_eq!(completion.usage.total_tokens(), input + output);
        }
    }
}
