//! Error types for the Bailian proxy
//!
//! All errors implement `IntoResponse` for Axum handlers and render as the
//! OpenAI-compatible error envelope, so callers always receive a body their SDK
//! can parse.

use crate::handlers::openai::types::ErrorEnvelope;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to read config file {path}: {source}")]
    ConfigFileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    ConfigParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration in {path}: {reason}")]
    ConfigValidationFailed { path: String, reason: String },

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Request to {endpoint} timed out after {timeout_seconds} seconds")]
    UpstreamTimeout {
        endpoint: String,
        timeout_seconds: u64,
    },

    #[error("Failed to reach upstream {endpoint}: {reason}")]
    UpstreamUnavailable { endpoint: String, reason: String },

    #[error("Stream from {endpoint} interrupted: {reason}")]
    StreamInterrupted { endpoint: String, reason: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// HTTP status reported to the caller for this error
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::UpstreamUnavailable { .. } | Self::StreamInterrupted { .. } => {
                StatusCode::BAD_GATEWAY
            }
            Self::Config(_)
            | Self::ConfigFileRead { .. }
            | Self::ConfigParseFailed { .. }
            | Self::ConfigValidationFailed { .. }
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Standard error envelope describing this error
    ///
    /// Timeouts carry their own `timeout_error` type so clients can tell them
    /// apart from other connectivity failures.
    pub fn envelope(&self) -> ErrorEnvelope {
        match self {
            Self::Validation(msg) => ErrorEnvelope::new(msg.clone(), "invalid_request_error"),
            Self::UpstreamTimeout { .. } => ErrorEnvelope::new(self.to_string(), "timeout_error"),
            _ => ErrorEnvelope::new(self.to_string(), "server_error"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.envelope())).into_response()
    }
}

/// Convenience type alias for Results
pub type AppResult<T> = Result<T, AppError>;
