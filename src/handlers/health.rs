//! Health check endpoint
//!
//! Liveness only: the upstream is not contacted.

use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;

use crate::handlers::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    /// Configured upstream mode, `native` or `compatible`
    pub mode: &'static str,
}

pub async fn handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok",
            service: "bailian-proxy",
            mode: state.config().upstream.mode().as_str(),
        }),
    )
}
