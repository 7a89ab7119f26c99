//! OpenAI-compatible streaming chat completions
//!
//! Drives a [`StreamTranslator`] over the upstream event stream and writes
//! each translated chunk as its own SSE event.
//!
//! # SSE Format
//!
//! ```text
//! data: {"id":"...","object":"chat.completion.chunk",...}
//!
//! data: [DONE]
//!
//! ```
//!
//! Failures that happen before the first byte reach the client as one SSE
//! event carrying the error envelope, with the error's status code. A read
//! failure after streaming began produces the same kind of event and ends the
//! stream without `[DONE]`.

use crate::adapter::{self, StreamTranslator};
use crate::error::AppError;
use crate::handlers::AppState;
use crate::metrics::{Fallback, Metrics, StreamOutcome};
use crate::middleware::RequestId;
use crate::upstream::sse;
use axum::{
    body::Body,
    http::{HeaderValue, StatusCode, header},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::VecDeque;
use std::convert::Infallible;
use std::time::Duration;

use super::completions::{encode_native, response_model};
use super::types::ChatCompletionRequest;

/// Interval between keep-alive comments on an idle stream
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Streaming native exchange
pub async fn native_stream(
    state: AppState,
    request_id: RequestId,
    request: ChatCompletionRequest,
) -> Response {
    let model = response_model(&state, &request);

    let body = match encode_native(&request, request_id) {
        Ok(body) => body,
        Err(e) => return error_event_response(&e),
    };

    let upstream = match state.forwarder().open_stream(body).await {
        Ok(upstream) => upstream,
        Err(e) => {
            tracing::error!(
                request_id = %request_id,
                error = %e,
                "Failed to open upstream stream"
            );
            return error_event_response(&e);
        }
    };

    if !upstream.status.is_success() {
        let status = upstream.status;
        let body = match upstream.collect().await {
            Ok(body) => body,
            Err(e) => return error_event_response(&e),
        };
        let data = match adapter::translate_error(&body, status.as_u16()) {
            Some(envelope) => {
                tracing::warn!(
                    request_id = %request_id,
                    status = status.as_u16(),
                    message = %envelope.error.message,
                    "Upstream rejected streaming request"
                );
                serde_json::to_string(&envelope).unwrap_or_default()
            }
            None => {
                state.metrics().record_fallback(Fallback::Error);
                tracing::warn!(
                    request_id = %request_id,
                    status = status.as_u16(),
                    "Upstream stream error body not translatable, forwarding raw body"
                );
                String::from_utf8_lossy(&body).into_owned()
            }
        };
        return single_event_response(status, &data);
    }

    tracing::info!(
        request_id = %request_id,
        model = %model,
        endpoint = %state.forwarder().endpoint(),
        "Starting streaming response"
    );

    let driver = NativeStreamDriver {
        frames: sse::data_payloads(upstream.body),
        translator: StreamTranslator::new(model),
        pending: VecDeque::new(),
        finished: false,
        guard: OutcomeGuard::new(state.metrics().clone(), request_id),
    };

    sse_response(driver.into_stream())
}

/// Per-exchange state threaded through the output stream
struct NativeStreamDriver {
    frames: BoxStream<'static, Result<String, AppError>>,
    translator: StreamTranslator,
    /// Events produced by the last frame and not yet written
    pending: VecDeque<Event>,
    finished: bool,
    guard: OutcomeGuard,
}

impl NativeStreamDriver {
    fn into_stream(self) -> impl futures::Stream<Item = Result<Event, Infallible>> + Send {
        stream::unfold(self, |mut driver| async move {
            loop {
                if let Some(event) = driver.pending.pop_front() {
                    return Some((Ok(event), driver));
                }
                if driver.finished {
                    return None;
                }
                match driver.frames.next().await {
                    Some(Ok(payload)) => driver.on_payload(&payload),
                    Some(Err(e)) => driver.on_read_error(&e),
                    None => driver.on_eof(),
                }
            }
        })
    }

    fn on_payload(&mut self, payload: &str) {
        let skipped_before = self.translator.skipped_frames();
        for event in self.translator.push_data(payload) {
            match event.to_data() {
                Ok(data) => self.pending.push_back(Event::default().data(data)),
                Err(e) => tracing::error!(
                    request_id = %self.guard.request_id,
                    error = %e,
                    "Failed to serialize stream chunk"
                ),
            }
        }
        self.guard
            .metrics
            .record_skipped_frames(self.translator.skipped_frames() - skipped_before);

        if self.translator.is_done() {
            self.finished = true;
            self.guard.finish(StreamOutcome::Completed);
            tracing::info!(
                request_id = %self.guard.request_id,
                emitted_bytes = self.translator.cursor().emitted_len(),
                "Stream completed"
            );
        }
    }

    fn on_read_error(&mut self, error: &AppError) {
        tracing::error!(
            request_id = %self.guard.request_id,
            error = %error,
            emitted_bytes = self.translator.cursor().emitted_len(),
            "Upstream stream failed mid-response"
        );
        self.pending.push_back(error_event(error));
        self.finished = true;
        self.guard.finish(StreamOutcome::UpstreamError);
    }

    fn on_eof(&mut self) {
        tracing::warn!(
            request_id = %self.guard.request_id,
            emitted_bytes = self.translator.cursor().emitted_len(),
            "Upstream stream ended without a finish reason"
        );
        self.finished = true;
        self.guard.finish(StreamOutcome::UpstreamEof);
    }
}

/// Records how a stream ended when it is dropped
///
/// A stream dropped before any outcome was set was abandoned by the client.
pub(crate) struct OutcomeGuard {
    metrics: Metrics,
    request_id: RequestId,
    outcome: Option<StreamOutcome>,
}

impl OutcomeGuard {
    pub(crate) fn new(metrics: Metrics, request_id: RequestId) -> Self {
        Self {
            metrics,
            request_id,
            outcome: None,
        }
    }

    pub(crate) fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// First outcome wins
    pub(crate) fn finish(&mut self, outcome: StreamOutcome) {
        self.outcome.get_or_insert(outcome);
    }
}

impl Drop for OutcomeGuard {
    fn drop(&mut self) {
        let outcome = self.outcome.unwrap_or_else(|| {
            tracing::info!(
                request_id = %self.request_id,
                "Client disconnected before stream finished, releasing upstream"
            );
            StreamOutcome::ClientDisconnected
        });
        self.metrics.record_stream_outcome(outcome);
    }
}

/// SSE event carrying the error envelope for `error`
pub(crate) fn error_event(error: &AppError) -> Event {
    Event::default().data(serde_json::to_string(&error.envelope()).unwrap_or_default())
}

/// Wrap an event stream in an SSE response
pub(crate) fn sse_response<S>(stream: S) -> Response
where
    S: futures::Stream<Item = Result<Event, Infallible>> + Send + 'static,
{
    let mut response = Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL))
        .into_response();
    response
        .headers_mut()
        .insert("x-accel-buffering", HeaderValue::from_static("no"));
    response
}

/// One-event SSE response with a non-2xx status
pub(crate) fn single_event_response(status: StatusCode, data: &str) -> Response {
    let mut frame = String::with_capacity(data.len() + 8);
    for line in data.lines() {
        frame.push_str("data: ");
        frame.push_str(line);
        frame.push('\n');
    }
    if frame.is_empty() {
        frame.push_str("data: \n");
    }
    frame.push('\n');

    (
        status,
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from(frame),
    )
        .into_response()
}

/// SSE error response for a failure before streaming began
pub(crate) fn error_event_response(error: &AppError) -> Response {
    let data = serde_json::to_string(&error.envelope()).unwrap_or_default();
    single_event_response(error.status(), &data)
}
