//! Integration tests for streaming /v1/chat/completions
//!
//! Tests the SSE path end to end:
//! - cumulative upstream text becomes delta chunks, a terminal chunk and [DONE]
//! - abnormal endings (EOF, mid-stream read failure) are not dressed up as success
//! - malformed frames are skipped
//! - errors before streaming arrive as a single SSE event
//! - client disconnects release the upstream

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, Bytes},
    http::{HeaderMap, Request, StatusCode, header},
};
use bailian_proxy::{
    config::Config,
    error::{AppError, AppResult},
    handlers::{self, AppState},
    metrics::{Metrics, StreamOutcome},
    upstream::{BufferedResponse, Forwarder, StreamingResponse},
};
use futures::stream::{self, StreamExt};
use serde_json::{Value, json};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_partial_json, header as header_eq, method, path},
};

const NATIVE_PATH: &str = "/api/v1/apps/app-test/completion";

fn create_test_config(base_url: &str, mode: &str) -> Config {
    Config::from_str(&format!(
        r#"
[upstream]
base_url = "{base_url}"
app_id = "app-test"
api_key = "sk-test"
mode = "{mode}"
request_timeout_seconds = 1
stream_timeout_seconds = 1
"#
    ))
    .expect("should parse test config")
}

fn create_test_app(server: &MockServer, mode: &str) -> (Router, Metrics) {
    let state = AppState::new(create_test_config(&server.uri(), mode))
        .expect("AppState::new should succeed");
    let metrics = state.metrics().clone();
    (handlers::app(state), metrics)
}

fn stream_request() -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({
                "model": "agent",
                "messages": [{"role": "user", "content": "hi"}],
                "stream": true
            })
            .to_string(),
        ))
        .unwrap()
}

async fn post_stream(app: Router) -> (StatusCode, HeaderMap, String) {
    let response = app.oneshot(stream_request()).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, headers, String::from_utf8(body.to_vec()).unwrap())
}

/// `data:` payloads of every event in an SSE body
fn data_payloads(body: &str) -> Vec<String> {
    body.split("\n\n")
        .filter_map(|event| {
            let data: Vec<&str> = event
                .lines()
                .filter_map(|l| l.strip_prefix("data:"))
                .map(str::trim_start)
                .collect();
            (!data.is_empty()).then(|| data.join("\n"))
        })
        .collect()
}

fn chunks(body: &str) -> Vec<Value> {
    data_payloads(body)
        .iter()
        .filter(|d| d.as_str() != "[DONE]")
        .map(|d| serde_json::from_str(d).expect("chunk should be JSON"))
        .collect()
}

fn native_frame(text: &str, finish_reason: Option<&str>) -> String {
    let frame = json!({
        "output": {"text": text, "finish_reason": finish_reason.unwrap_or("null"), "session_id": "s1"},
        "usage": {"models": [{"input_tokens": 4, "output_tokens": 3, "model_id": "qwen-max"}]},
        "request_id": "req-42"
    });
    format!("id:1\nevent:result\n:HTTP_STATUS/200\ndata:{}\n\n", frame)
}

async fn mount_stream(server: &MockServer, body: String) {
    Mock::given(method("POST"))
        .and(path(NATIVE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(server)
        .await;
}

// -------------------------------------------------------------------------
// Happy path
// -------------------------------------------------------------------------

#[tokio::test]
async fn test_cumulative_text_becomes_deltas() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(NATIVE_PATH))
        .and(header_eq("accept", "text/event-stream"))
        .and(header_eq("x-dashscope-sse", "enable"))
        .and(body_partial_json(json!({"input": {"prompt": "hi"}})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            [
                native_frame("Hi", None),
                native_frame("Hi there", None),
                native_frame("Hi there!", None),
                native_frame("Hi there!", Some("stop")),
            ]
            .concat(),
            "text/event-stream",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let (app, metrics) = create_test_app(&server, "native");
    let (status, headers, body) = post_stream(app).await;

    assert_eq!(status, StatusCode::OK);
    assert!(
        headers
            .get(header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("text/event-stream")
    );

    let payloads = data_payloads(&body);
    assert_eq!(payloads.len(), 5, "body: {}", body);
    assert_eq!(payloads.last().unwrap(), "[DONE]");

    let chunks = chunks(&body);
    let deltas: Vec<&str> = chunks[..3]
        .iter()
        .map(|c| c["choices"][0]["delta"]["content"].as_str().unwrap())
        .collect();
    assert_eq!(deltas, vec!["Hi", " there", "!"]);

    for chunk in &chunks[..3] {
        assert_eq!(chunk["id"], "req-42");
        assert_eq!(chunk["object"], "chat.completion.chunk");
        assert_eq!(chunk["model"], "agent");
        assert!(chunk["choices"][0]["finish_reason"].is_null());
        assert!(chunk.get("usage").is_none());
    }

    let terminal = &chunks[3];
    assert_eq!(terminal["choices"][0]["delta"], json!({}));
    assert_eq!(terminal["choices"][0]["finish_reason"], "stop");
    assert_eq!(
        terminal["usage"],
        json!({"prompt_tokens": 4, "completion_tokens": 3, "total_tokens": 7})
    );

    assert_eq!(metrics.stream_outcome_count(StreamOutcome::Completed), 1);
}

#[tokio::test]
async fn test_frames_after_finish_are_ignored() {
    let server = MockServer::start().await;
    mount_stream(
        &server,
        [
            native_frame("Done", Some("stop")),
            native_frame("Done and more", None),
        ]
        .concat(),
    )
    .await;

    let (app, _) = create_test_app(&server, "native");
    let (_, _, body) = post_stream(app).await;

    let payloads = data_payloads(&body);
    assert_eq!(payloads.len(), 3, "body: {}", body);
    assert_eq!(payloads[2], "[DONE]");
    assert!(!body.contains("and more"));
}

#[tokio::test]
async fn test_finish_frame_with_null_fields_still_terminates() {
    let server = MockServer::start().await;
    let finish = json!({
        "output": {"text": "Hi there", "finish_reason": "stop", "session_id": null},
        "usage": null,
        "request_id": null
    });
    mount_stream(
        &server,
        format!(
            "{}data:{}\n\n",
            native_frame("Hi", None),
            finish
        ),
    )
    .await;

    let (app, metrics) = create_test_app(&server, "native");
    let (status, _, body) = post_stream(app).await;

    assert_eq!(status, StatusCode::OK);
    let payloads = data_payloads(&body);
    assert_eq!(payloads.len(), 4, "body: {}", body);
    assert_eq!(payloads[3], "[DONE]");

    let chunks = chunks(&body);
    assert_eq!(chunks[1]["choices"][0]["delta"]["content"], " there");
    let terminal = &chunks[2];
    assert_eq!(terminal["id"], "req-42");
    assert_eq!(terminal["choices"][0]["finish_reason"], "stop");
    assert!(terminal.get("usage").is_none());

    assert_eq!(metrics.stream_outcome_count(StreamOutcome::Completed), 1);
    assert_eq!(metrics.skipped_frames_count(), 0);
}

// -------------------------------------------------------------------------
// Abnormal endings
// -------------------------------------------------------------------------

#[tokio::test]
async fn test_eof_without_finish_reason_has_no_terminal_chunk() {
    let server = MockServer::start().await;
    mount_stream(
        &server,
        [native_frame("Partial", None), native_frame("Partial answer", None)].concat(),
    )
    .await;

    let (app, metrics) = create_test_app(&server, "native");
    let (status, _, body) = post_stream(app).await;

    assert_eq!(status, StatusCode::OK);
    assert!(!body.contains("[DONE]"));
    let chunks = chunks(&body);
    assert_eq!(chunks.len(), 2);
    assert!(chunks.iter().all(|c| c["choices"][0]["finish_reason"].is_null()));
    assert_eq!(metrics.stream_outcome_count(StreamOutcome::UpstreamEof), 1);
}

#[tokio::test]
async fn test_malformed_frame_is_skipped() {
    let server = MockServer::start().await;
    mount_stream(
        &server,
        [
            native_frame("A", None),
            "data:{\"output\": broken\n\n".to_string(),
            native_frame("AB", Some("stop")),
        ]
        .concat(),
    )
    .await;

    let (app, metrics) = create_test_app(&server, "native");
    let (_, _, body) = post_stream(app).await;

    let chunks = chunks(&body);
    assert_eq!(chunks[0]["choices"][0]["delta"]["content"], "A");
    assert_eq!(chunks[1]["choices"][0]["delta"]["content"], "B");
    assert_eq!(chunks[2]["choices"][0]["finish_reason"], "stop");
    assert!(body.ends_with("data: [DONE]\n\n"));
    assert_eq!(metrics.skipped_frames_count(), 1);
}

// -------------------------------------------------------------------------
// Errors before streaming
// -------------------------------------------------------------------------

#[tokio::test]
async fn test_upstream_error_status_becomes_sse_error_event() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_raw(
            "event:error\ndata:{\"code\":\"InvalidApiKey\",\"message\":\"Invalid API-key provided.\"}\n\n",
            "text/event-stream",
        ))
        .mount(&server)
        .await;

    let (app, _) = create_test_app(&server, "native");
    let (status, headers, body) = post_stream(app).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(headers.get(header::CONTENT_TYPE).unwrap(), "text/event-stream");

    let payloads = data_payloads(&body);
    assert_eq!(payloads.len(), 1);
    let envelope: Value = serde_json::from_str(&payloads[0]).unwrap();
    assert_eq!(
        envelope,
        json!({"error": {
            "message": "Invalid API-key provided.",
            "type": "authentication_error",
            "code": "InvalidApiKey"
        }})
    );
}

#[tokio::test]
async fn test_untranslatable_error_is_relayed_as_data() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream overloaded"))
        .mount(&server)
        .await;

    let (app, _) = create_test_app(&server, "native");
    let (status, _, body) = post_stream(app).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body, "data: upstream overloaded\n\n");
}

#[tokio::test]
async fn test_stream_timeout_becomes_timeout_event() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let (app, _) = create_test_app(&server, "native");
    let (status, _, body) = post_stream(app).await;

    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    let payloads = data_payloads(&body);
    let envelope: Value = serde_json::from_str(&payloads[0]).unwrap();
    assert_eq!(envelope["error"]["type"], "timeout_error");
}

// -------------------------------------------------------------------------
// Compatible mode
// -------------------------------------------------------------------------

#[tokio::test]
async fn test_compatible_stream_is_piped_unchanged() {
    let upstream_body = "data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n\ndata: [DONE]\n\n";

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(
            "/api/v2/apps/agent/app-test/compatible-mode/v1/chat/completions",
        ))
        .and(header_eq("accept", "text/event-stream"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(upstream_body, "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let (app, metrics) = create_test_app(&server, "compatible");
    let (status, headers, body) = post_stream(app).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get(header::CONTENT_TYPE).unwrap(), "text/event-stream");
    assert_eq!(body, upstream_body);
    assert_eq!(metrics.stream_outcome_count(StreamOutcome::Completed), 1);
}

#[tokio::test]
async fn test_compatible_stream_error_status_is_one_data_frame() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_string(r#"{"error":{"message":"slow"}}"#))
        .mount(&server)
        .await;

    let (app, _) = create_test_app(&server, "compatible");
    let (status, _, body) = post_stream(app).await;

    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body, "data: {\"error\":{\"message\":\"slow\"}}\n\n");
}

// -------------------------------------------------------------------------
// Scripted forwarder: mid-stream failures and disconnects
// -------------------------------------------------------------------------

/// Forwarder that replays a fixed list of body chunks, then optionally hangs
struct ScriptedForwarder {
    chunks: Vec<Result<String, &'static str>>,
    hang_after: bool,
}

#[async_trait]
impl Forwarder for ScriptedForwarder {
    fn endpoint(&self) -> &str {
        "scripted://upstream"
    }

    async fn send(&self, _body: Bytes) -> AppResult<BufferedResponse> {
        Err(AppError::Internal("not scripted".to_string()))
    }

    async fn open_stream(&self, _body: Bytes) -> AppResult<StreamingResponse> {
        let items: Vec<Result<Bytes, AppError>> = self
            .chunks
            .iter()
            .map(|c| match c {
                Ok(s) => Ok(Bytes::from(s.clone())),
                Err(reason) => Err(AppError::StreamInterrupted {
                    endpoint: "scripted://upstream".to_string(),
                    reason: reason.to_string(),
                }),
            })
            .collect();
        let body = stream::iter(items);
        let body = if self.hang_after {
            body.chain(stream::pending()).boxed()
        } else {
            body.boxed()
        };
        Ok(StreamingResponse {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body,
        })
    }
}

fn scripted_app(forwarder: ScriptedForwarder) -> (Router, Metrics) {
    let metrics = Metrics::new().unwrap();
    let config = create_test_config("http://unused.invalid", "native");
    let state = AppState::with_forwarder(config, Arc::new(forwarder), metrics.clone());
    (handlers::app(state), metrics)
}

#[tokio::test]
async fn test_mid_stream_failure_emits_error_event_without_done() {
    let (app, metrics) = scripted_app(ScriptedForwarder {
        chunks: vec![Ok(native_frame("Hel", None)), Err("connection reset")],
        hang_after: false,
    });

    let (status, _, body) = post_stream(app).await;

    assert_eq!(status, StatusCode::OK);
    let payloads = data_payloads(&body);
    assert_eq!(payloads.len(), 2, "body: {}", body);

    let delta: Value = serde_json::from_str(&payloads[0]).unwrap();
    assert_eq!(delta["choices"][0]["delta"]["content"], "Hel");

    let error: Value = serde_json::from_str(&payloads[1]).unwrap();
    assert_eq!(error["error"]["type"], "server_error");
    assert!(
        error["error"]["message"]
            .as_str()
            .unwrap()
            .contains("connection reset")
    );
    assert!(!body.contains("[DONE]"));
    assert!(!body.contains("finish_reason\":\"stop"));
    assert_eq!(metrics.stream_outcome_count(StreamOutcome::UpstreamError), 1);
}

#[tokio::test]
async fn test_client_disconnect_releases_upstream() {
    let (app, metrics) = scripted_app(ScriptedForwarder {
        chunks: vec![Ok(native_frame("Hello", None))],
        hang_after: true,
    });

    let response = app.oneshot(stream_request()).await.unwrap();
    let mut body = response.into_body().into_data_stream();

    let first = tokio::time::timeout(Duration::from_secs(5), body.next())
        .await
        .expect("first event should arrive")
        .expect("stream should not be empty")
        .unwrap();
    assert!(std::str::from_utf8(&first).unwrap().contains("Hello"));

    drop(body);

    assert_eq!(
        metrics.stream_outcome_count(StreamOutcome::ClientDisconnected),
        1
    );
}
