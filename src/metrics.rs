//! Prometheus metrics collection for the Bailian proxy
//!
//! Tracks:
//! - Inbound chat requests by kind (streaming or not)
//! - Upstream responses by status class and upstream transport failures
//! - How streamed exchanges end
//! - Skipped stream frames and raw-body translation fallbacks
//!
//! Metrics are exposed via the `/metrics` endpoint in Prometheus text format.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;

/// Request kind label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Stream,
    NonStream,
}

impl RequestKind {
    pub fn from_stream_flag(stream: bool) -> Self {
        if stream { Self::Stream } else { Self::NonStream }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stream => "stream",
            Self::NonStream => "non_stream",
        }
    }
}

/// Upstream transport failure label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamFailure {
    Timeout,
    Connect,
    Other,
}

impl UpstreamFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Connect => "connect",
            Self::Other => "other",
        }
    }
}

/// How a streamed exchange ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// Upstream sent a finish reason; terminal chunk and sentinel were emitted
    Completed,
    /// Upstream body ended before any finish reason
    UpstreamEof,
    /// Reading the upstream body failed mid-stream
    UpstreamError,
    /// The client went away before the exchange finished
    ClientDisconnected,
}

impl StreamOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::UpstreamEof => "upstream_eof",
            Self::UpstreamError => "upstream_error",
            Self::ClientDisconnected => "client_disconnected",
        }
    }
}

/// Which translation fell back to forwarding the raw upstream body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
    Response,
    Error,
}

impl Fallback {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Response => "response",
            Self::Error => "error",
        }
    }
}

/// Metrics collector
///
/// Cheap to clone; all collectors share one registry.
#[derive(Clone)]
pub struct Metrics {
    pub registry: Arc<Registry>,
    requests_total: IntCounterVec,
    upstream_responses: IntCounterVec,
    upstream_failures: IntCounterVec,
    upstream_duration: HistogramVec,
    stream_outcomes: IntCounterVec,
    frames_skipped: IntCounter,
    translation_fallbacks: IntCounterVec,
}

impl Metrics {
    /// Create a new Metrics instance
    ///
    /// # Errors
    ///
    /// Returns an error if metric registration fails (e.g., duplicate names).
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new(
                "bailian_proxy_requests_total",
                "Total number of chat completion requests by kind",
            ),
            &["kind"],
        )?;

        let upstream_responses = IntCounterVec::new(
            Opts::new(
                "bailian_proxy_upstream_responses_total",
                "Upstream responses by HTTP status class",
            ),
            &["status_class"],
        )?;

        let upstream_failures = IntCounterVec::new(
            Opts::new(
                "bailian_proxy_upstream_failures_total",
                "Upstream calls that produced no HTTP response, by failure kind",
            ),
            &["kind"],
        )?;

        // Time until response headers arrive; streamed bodies are not included
        let upstream_duration = HistogramVec::new(
            HistogramOpts::new(
                "bailian_proxy_upstream_duration_seconds",
                "Time until the upstream response headers arrived",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 180.0]),
            &["kind"],
        )?;

        let stream_outcomes = IntCounterVec::new(
            Opts::new(
                "bailian_proxy_stream_outcomes_total",
                "Streamed exchanges by how they ended",
            ),
            &["outcome"],
        )?;

        let frames_skipped = IntCounter::new(
            "bailian_proxy_stream_frames_skipped_total",
            "Upstream stream frames skipped because they could not be parsed",
        )?;

        let translation_fallbacks = IntCounterVec::new(
            Opts::new(
                "bailian_proxy_translation_fallbacks_total",
                "Upstream bodies forwarded raw because translation failed",
            ),
            &["kind"],
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(upstream_responses.clone()))?;
        registry.register(Box::new(upstream_failures.clone()))?;
        registry.register(Box::new(upstream_duration.clone()))?;
        registry.register(Box::new(stream_outcomes.clone()))?;
        registry.register(Box::new(frames_skipped.clone()))?;
        registry.register(Box::new(translation_fallbacks.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            requests_total,
            upstream_responses,
            upstream_failures,
            upstream_duration,
            stream_outcomes,
            frames_skipped,
            translation_fallbacks,
        })
    }

    pub fn record_request(&self, kind: RequestKind) {
        self.requests_total.with_label_values(&[kind.as_str()]).inc();
    }

    /// Record an upstream response and how long its headers took
    pub fn record_upstream_response(&self, kind: RequestKind, status: u16, elapsed: Duration) {
        let class = match status {
            200..=299 => "2xx",
            400..=499 => "4xx",
            500..=599 => "5xx",
            _ => "other",
        };
        self.upstream_responses.with_label_values(&[class]).inc();
        self.upstream_duration
            .with_label_values(&[kind.as_str()])
            .observe(elapsed.as_secs_f64());
    }

    pub fn record_upstream_failure(&self, failure: UpstreamFailure) {
        self.upstream_failures
            .with_label_values(&[failure.as_str()])
            .inc();
    }

    pub fn record_stream_outcome(&self, outcome: StreamOutcome) {
        self.stream_outcomes
            .with_label_values(&[outcome.as_str()])
            .inc();
    }

    pub fn record_skipped_frames(&self, count: u64) {
        if count > 0 {
            self.frames_skipped.inc_by(count);
        }
    }

    pub fn record_fallback(&self, fallback: Fallback) {
        self.translation_fallbacks
            .with_label_values(&[fallback.as_str()])
            .inc();
    }

    /// Current count for a stream outcome (used by tests and diagnostics)
    pub fn stream_outcome_count(&self, outcome: StreamOutcome) -> u64 {
        self.stream_outcomes
            .with_label_values(&[outcome.as_str()])
            .get()
    }

    pub fn skipped_frames_count(&self) -> u64 {
        self.frames_skipped.get()
    }

    pub fn fallback_count(&self, fallback: Fallback) -> u64 {
        self.translation_fallbacks
            .with_label_values(&[fallback.as_str()])
            .get()
    }

    /// Gather all metrics and encode them in Prometheus text format
    ///
    /// # Errors
    ///
    /// Returns an error if metric encoding fails.
    pub fn gather(&self) -> Result<String, prometheus::Error> {
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    metric_family_count = metric_families.len(),
                    "Prometheus text encoder failed"
                );
                e
            })?;

        String::from_utf8(buffer).map_err(|e| {
            prometheus::Error::Msg(format!(
                "Prometheus encoder produced invalid UTF-8 at byte {}",
                e.utf8_error().valid_up_to()
            ))
        })
    }
}
