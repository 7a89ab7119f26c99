//! Native error body + status → standard error envelope

use super::extract::extract_json;
use super::native::NativeError;
use crate::handlers::openai::types::ErrorEnvelope;

/// Message used when an error body mentions a message we cannot parse out
pub const GENERIC_ERROR_MESSAGE: &str = "Upstream request failed";

/// Standard error type for an upstream HTTP status
pub fn error_type_for_status(status: u16) -> &'static str {
    match status {
        400 | 404 => "invalid_request_error",
        401 => "authentication_error",
        403 => "permission_error",
        429 => "rate_limit_error",
        500 | 502 | 503 => "server_error",
        _ => "api_error",
    }
}

/// Translate an upstream error body
///
/// Returns `None` when the body holds no recognizable error; the caller then
/// forwards the raw body with the upstream status.
pub fn translate_error(body: &[u8], status: u16) -> Option<ErrorEnvelope> {
    let json = extract_json(body).unwrap_or(body);

    let native = match serde_json::from_slice::<NativeError>(json) {
        Ok(native) => native,
        Err(e) => {
            if !contains(body, br#""message""#) {
                tracing::debug!(error = %e, status, "Upstream error body has no parseable error");
                return None;
            }
            tracing::debug!(
                error = %e,
                status,
                "Upstream error body mentions a message but does not parse, using generic error"
            );
            NativeError {
                code: "api_error".to_string(),
                message: GENERIC_ERROR_MESSAGE.to_string(),
                request_id: String::new(),
            }
        }
    };

    if !native.request_id.is_empty() {
        tracing::debug!(
            upstream_request_id = %native.request_id,
            code = %native.code,
            "Translated upstream error"
        );
    }

    Some(ErrorEnvelope::new(native.message, error_type_for_status(status)).with_code(native.code))
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}
