//! OpenAI-compatible chat completions handler
//!
//! Handles POST /v1/chat/completions. Requests are dispatched on the configured
//! upstream mode and the request's `stream` flag; this module also owns the
//! native non-streaming path.

use crate::adapter;
use crate::config::UpstreamMode;
use crate::error::{AppError, AppResult};
use crate::handlers::AppState;
use crate::metrics::{Fallback, RequestKind};
use crate::middleware::RequestId;
use crate::upstream::BufferedResponse;
use axum::{
    Extension, Json,
    body::{Body, Bytes},
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};

use super::extractor::ChatRequest;
use super::types::ChatCompletionRequest;
use super::{passthrough, streaming};

/// Longest prefix of an outbound native body written to debug logs
const LOGGED_BODY_LIMIT: usize = 500;

/// Upstream headers that describe the upstream connection or body encoding
const SKIPPED_RESPONSE_HEADERS: [header::HeaderName; 4] = [
    header::CONTENT_TYPE,
    header::CONTENT_LENGTH,
    header::TRANSFER_ENCODING,
    header::CONNECTION,
];

/// POST /v1/chat/completions handler
///
/// Malformed or empty requests are rejected by the [`ChatRequest`] extractor
/// with a 400 before this runs.
pub async fn handler(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    ChatRequest { request, raw }: ChatRequest,
) -> Response {
    let kind = RequestKind::from_stream_flag(request.stream());
    state.metrics().record_request(kind);

    let mode = state.config().upstream.mode();
    tracing::info!(
        request_id = %request_id,
        mode = mode.as_str(),
        stream = request.stream(),
        messages_count = request.messages().len(),
        model = ?request.model(),
        "Received chat completions request"
    );

    match (mode, request.stream()) {
        (UpstreamMode::Native, false) => native_completion(&state, request_id, &request)
            .await
            .unwrap_or_else(|e| {
                tracing::error!(request_id = %request_id, error = %e, "Chat completion failed");
                e.into_response()
            }),
        (UpstreamMode::Native, true) => streaming::native_stream(state, request_id, request).await,
        (UpstreamMode::Compatible, false) => passthrough::buffered(&state, request_id, raw).await,
        (UpstreamMode::Compatible, true) => passthrough::streaming(state, request_id, raw).await,
    }
}

/// Model name echoed back to the caller
pub(crate) fn response_model(state: &AppState, request: &ChatCompletionRequest) -> String {
    request
        .model()
        .unwrap_or_else(|| state.config().upstream.default_model())
        .to_string()
}

/// Serialize the native request body, logging a bounded prefix of it
pub(crate) fn encode_native(
    request: &ChatCompletionRequest,
    request_id: RequestId,
) -> AppResult<Bytes> {
    let native = adapter::to_native(request);
    let body = serde_json::to_vec(&native)
        .map_err(|e| AppError::Internal(format!("Failed to encode upstream request: {}", e)))?;

    if tracing::enabled!(tracing::Level::DEBUG) {
        let text = String::from_utf8_lossy(&body);
        tracing::debug!(
            request_id = %request_id,
            body_len = body.len(),
            body = %truncate_for_log(&text, LOGGED_BODY_LIMIT),
            "Native request body"
        );
    }

    Ok(Bytes::from(body))
}

/// Longest prefix of `text` that fits in `max` bytes without splitting a
/// character
pub(crate) fn truncate_for_log(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Upstream headers worth passing to the caller, with a JSON content type
pub(crate) fn forwarded_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(upstream.len() + 1);
    for (name, value) in upstream {
        if !SKIPPED_RESPONSE_HEADERS.contains(name) {
            headers.append(name.clone(), value.clone());
        }
    }
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    headers
}

/// Response carrying an upstream body byte for byte
pub(crate) fn raw_response(status: StatusCode, headers: HeaderMap, body: Bytes) -> Response {
    (status, headers, Body::from(body)).into_response()
}

/// Translate a non-2xx buffered upstream response
///
/// Falls back to the raw body when nothing in it can be translated.
fn error_response(state: &AppState, request_id: RequestId, upstream: BufferedResponse) -> Response {
    let headers = forwarded_headers(&upstream.headers);
    match adapter::translate_error(&upstream.body, upstream.status.as_u16()) {
        Some(envelope) => {
            tracing::warn!(
                request_id = %request_id,
                status = upstream.status.as_u16(),
                error_type = %envelope.error.error_type,
                message = %envelope.error.message,
                "Upstream returned an error"
            );
            (upstream.status, headers, Json(envelope)).into_response()
        }
        None => {
            state.metrics().record_fallback(Fallback::Error);
            tracing::warn!(
                request_id = %request_id,
                status = upstream.status.as_u16(),
                body_len = upstream.body.len(),
                "Upstream error body not translatable, forwarding raw body"
            );
            raw_response(upstream.status, headers, upstream.body)
        }
    }
}

/// Buffered native exchange
async fn native_completion(
    state: &AppState,
    request_id: RequestId,
    request: &ChatCompletionRequest,
) -> AppResult<Response> {
    let model = response_model(state, request);
    let body = encode_native(request, request_id)?;

    let upstream = state.forwarder().send(body).await?;

    if !upstream.status.is_success() {
        return Ok(error_response(state, request_id, upstream));
    }

    let headers = forwarded_headers(&upstream.headers);
    match adapter::to_openai(&upstream.body, &model) {
        Ok(completion) => {
            tracing::info!(
                request_id = %request_id,
                completion_id = %completion.id,
                total_tokens = completion.usage.total_tokens(),
                "Chat completion translated"
            );
            Ok((upstream.status, headers, Json(completion)).into_response())
        }
        Err(e) => {
            state.metrics().record_fallback(Fallback::Response);
            tracing::warn!(
                request_id = %request_id,
                error = %e,
                body_len = upstream.body.len(),
                "Upstream response not translatable, forwarding raw body"
            );
            Ok(raw_response(upstream.status, headers, upstream.body))
        }
    }
}
