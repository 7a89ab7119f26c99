//! Chat request extractor with OpenAI-compatible error responses
//!
//! Reads the raw body regardless of `Content-Type`, parses it, and validates
//! it. Every failure becomes a 400 with the standard error envelope, before
//! anything is sent upstream. The raw bytes are kept for passthrough mode.

use axum::{
    body::Bytes,
    extract::{FromRequest, Request},
};

use super::types::ChatCompletionRequest;
use crate::error::AppError;

/// A parsed and validated chat request together with the bytes it came from
#[derive(Debug)]
pub struct ChatRequest {
    pub request: ChatCompletionRequest,
    pub raw: Bytes,
}

impl ChatRequest {
    /// Parse and validate a raw request body
    pub fn from_bytes(raw: Bytes) -> Result<Self, AppError> {
        let request: ChatCompletionRequest = serde_json::from_slice(&raw)
            .map_err(|e| AppError::Validation(format!("Invalid request body: {}", e)))?;
        request.validate().map_err(AppError::Validation)?;
        Ok(Self { request, raw })
    }
}

impl<S> FromRequest<S> for ChatRequest
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let raw = Bytes::from_request(req, state)
            .await
            .map_err(|e| AppError::Validation(format!("Failed to read request body: {}", e)))?;
        Self::from_bytes(raw)
    }
}
