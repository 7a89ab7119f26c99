//! Compatible-mode passthrough
//!
//! The upstream already speaks the standard protocol, so request bodies are
//! forwarded verbatim and responses are relayed unchanged.

use crate::error::AppError;
use crate::handlers::AppState;
use crate::metrics::StreamOutcome;
use crate::middleware::RequestId;
use axum::{
    body::{Body, Bytes},
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
};
use futures::stream::{self, BoxStream, StreamExt};
use std::convert::Infallible;

use super::completions::{forwarded_headers, raw_response};
use super::streaming::{OutcomeGuard, error_event_response, single_event_response};

/// Buffered passthrough: upstream status and body are returned as-is
pub async fn buffered(state: &AppState, request_id: RequestId, raw: Bytes) -> Response {
    match state.forwarder().send(raw).await {
        Ok(upstream) => {
            tracing::info!(
                request_id = %request_id,
                status = upstream.status.as_u16(),
                body_len = upstream.body.len(),
                "Relaying compatible-mode response"
            );
            raw_response(
                upstream.status,
                forwarded_headers(&upstream.headers),
                upstream.body,
            )
        }
        Err(e) => {
            tracing::error!(request_id = %request_id, error = %e, "Compatible-mode request failed");
            e.into_response()
        }
    }
}

/// Streaming passthrough: upstream bytes are piped to the client unchanged
pub async fn streaming(state: AppState, request_id: RequestId, raw: Bytes) -> Response {
    let upstream = match state.forwarder().open_stream(raw).await {
        Ok(upstream) => upstream,
        Err(e) => {
            tracing::error!(
                request_id = %request_id,
                error = %e,
                "Failed to open compatible-mode stream"
            );
            return error_event_response(&e);
        }
    };

    if !upstream.status.is_success() {
        let status = upstream.status;
        return match upstream.collect().await {
            Ok(body) => {
                tracing::warn!(
                    request_id = %request_id,
                    status = status.as_u16(),
                    "Compatible-mode upstream rejected streaming request"
                );
                single_event_response(status, &String::from_utf8_lossy(&body))
            }
            Err(e) => error_event_response(&e),
        };
    }

    let guard = OutcomeGuard::new(state.metrics().clone(), request_id);
    let body = Body::from_stream(relay(upstream.body, guard));

    let mut response = (
        upstream.status,
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response();
    response
        .headers_mut()
        .insert("x-accel-buffering", HeaderValue::from_static("no"));
    response
}

/// Copy upstream chunks through; a read error becomes a final error event
fn relay(
    upstream: BoxStream<'static, Result<Bytes, AppError>>,
    guard: OutcomeGuard,
) -> impl futures::Stream<Item = Result<Bytes, Infallible>> + Send {
    stream::unfold(
        (upstream, guard, false),
        |(mut upstream, mut guard, ended)| async move {
            if ended {
                return None;
            }
            match upstream.next().await {
                Some(Ok(chunk)) => Some((Ok(chunk), (upstream, guard, false))),
                Some(Err(e)) => {
                    tracing::error!(
                        request_id = %guard.request_id(),
                        error = %e,
                        "Compatible-mode stream failed mid-response"
                    );
                    guard.finish(StreamOutcome::UpstreamError);
                    let frame = format!(
                        "data: {}\n\n",
                        serde_json::to_string(&e.envelope()).unwrap_or_default()
                    );
                    Some((Ok(Bytes::from(frame)), (upstream, guard, true)))
                }
                None => {
                    guard.finish(StreamOutcome::Completed);
                    None
                }
            }
        },
    )
}
