//! Outbound transport to the agent application
//!
//! [`Forwarder`] is the seam between handlers and the network. The production
//! implementation, [`HttpForwarder`], owns two pooled `reqwest` clients built
//! once at startup: one bounded by the request timeout for buffered calls and
//! one bounded by the longer stream timeout for event streams. Neither retries.

pub mod sse;

use crate::config::{ApiKey, UpstreamConfig, UpstreamMode};
use crate::error::{AppError, AppResult};
use crate::metrics::{Metrics, RequestKind, UpstreamFailure};
use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode};
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use std::time::{Duration, Instant};

/// User-Agent sent on every upstream call
pub const USER_AGENT: &str = concat!("bailian-proxy/", env!("CARGO_PKG_VERSION"));

/// Fully read upstream response
#[derive(Debug)]
pub struct BufferedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Upstream response whose body is still being received
pub struct StreamingResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: BoxStream<'static, Result<Bytes, AppError>>,
}

impl StreamingResponse {
    /// Read the rest of the body into memory (used for error bodies)
    pub async fn collect(self) -> AppResult<Bytes> {
        let buf = self
            .body
            .try_fold(Vec::new(), |mut buf, chunk| async move {
                buf.extend_from_slice(&chunk);
                Ok(buf)
            })
            .await?;
        Ok(Bytes::from(buf))
    }
}

impl std::fmt::Debug for StreamingResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Sends request bodies to the upstream application
#[async_trait]
pub trait Forwarder: Send + Sync {
    /// Endpoint requests are sent to, for logging
    fn endpoint(&self) -> &str;

    /// Send a body and wait for the complete response
    async fn send(&self, body: Bytes) -> AppResult<BufferedResponse>;

    /// Send a body and return as soon as response headers arrive
    async fn open_stream(&self, body: Bytes) -> AppResult<StreamingResponse>;
}

/// `reqwest`-backed forwarder
pub struct HttpForwarder {
    client: reqwest::Client,
    stream_client: reqwest::Client,
    endpoint: String,
    api_key: ApiKey,
    mode: UpstreamMode,
    request_timeout: Duration,
    stream_timeout: Duration,
    metrics: Metrics,
}

impl HttpForwarder {
    /// Build both pooled clients from the upstream settings
    ///
    /// # Errors
    ///
    /// Returns `AppError::Internal` if the TLS backend cannot be initialized.
    pub fn new(config: &UpstreamConfig, metrics: Metrics) -> AppResult<Self> {
        Ok(Self {
            client: build_client(config, config.request_timeout())?,
            stream_client: build_client(config, config.stream_timeout())?,
            endpoint: config.endpoint(),
            api_key: config.api_key().clone(),
            mode: config.mode(),
            request_timeout: config.request_timeout(),
            stream_timeout: config.stream_timeout(),
            metrics,
        })
    }

    fn request(&self, client: &reqwest::Client, body: Bytes, streaming: bool) -> reqwest::RequestBuilder {
        let mut builder = client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .header(CONTENT_TYPE, "application/json");

        builder = if streaming {
            let builder = builder.header(ACCEPT, "text/event-stream");
            match self.mode {
                UpstreamMode::Native => builder.header("X-DashScope-SSE", "enable"),
                UpstreamMode::Compatible => builder,
            }
        } else {
            builder.header(ACCEPT, "application/json")
        };

        builder.body(body)
    }

    /// Classify a transport failure, record it and convert it
    fn transport_error(&self, error: reqwest::Error, timeout: Duration) -> AppError {
        let failure = if error.is_timeout() {
            UpstreamFailure::Timeout
        } else if error.is_connect() {
            UpstreamFailure::Connect
        } else {
            UpstreamFailure::Other
        };
        self.metrics.record_upstream_failure(failure);

        tracing::error!(
            endpoint = %self.endpoint,
            failure = failure.as_str(),
            error = %error,
            "Upstream call failed"
        );

        match failure {
            UpstreamFailure::Timeout => AppError::UpstreamTimeout {
                endpoint: self.endpoint.clone(),
                timeout_seconds: timeout.as_secs(),
            },
            UpstreamFailure::Connect | UpstreamFailure::Other => AppError::UpstreamUnavailable {
                endpoint: self.endpoint.clone(),
                reason: error.to_string(),
            },
        }
    }
}

#[async_trait]
impl Forwarder for HttpForwarder {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn send(&self, body: Bytes) -> AppResult<BufferedResponse> {
        let started = Instant::now();
        let response = self
            .request(&self.client, body, false)
            .send()
            .await
            .map_err(|e| self.transport_error(e, self.request_timeout))?;

        let status = response.status();
        self.metrics
            .record_upstream_response(RequestKind::NonStream, status.as_u16(), started.elapsed());

        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(e, self.request_timeout))?;

        tracing::debug!(
            endpoint = %self.endpoint,
            status = status.as_u16(),
            body_len = body.len(),
            "Upstream response received"
        );

        Ok(BufferedResponse {
            status,
            headers,
            body,
        })
    }

    async fn open_stream(&self, body: Bytes) -> AppResult<StreamingResponse> {
        let started = Instant::now();
        let response = self
            .request(&self.stream_client, body, true)
            .send()
            .await
            .map_err(|e| self.transport_error(e, self.stream_timeout))?;

        let status = response.status();
        self.metrics
            .record_upstream_response(RequestKind::Stream, status.as_u16(), started.elapsed());

        let headers = response.headers().clone();
        let endpoint = self.endpoint.clone();
        let body = response
            .bytes_stream()
            .map_err(move |e| AppError::StreamInterrupted {
                endpoint: endpoint.clone(),
                reason: e.to_string(),
            })
            .boxed();

        Ok(StreamingResponse {
            status,
            headers,
            body,
        })
    }
}

fn build_client(config: &UpstreamConfig, timeout: Duration) -> AppResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(config.connect_timeout())
        .pool_max_idle_per_host(config.pool_max_idle_per_host())
        .pool_idle_timeout(config.pool_idle_timeout())
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))
}
