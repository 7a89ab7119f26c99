//! HTTP request handlers for the Bailian proxy

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::metrics::Metrics;
use crate::middleware::request_id_middleware;
use crate::upstream::{Forwarder, HttpForwarder};
use axum::{
    Router, middleware,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub mod health;
pub mod metrics;
pub mod openai;

/// Application state shared across all handlers
///
/// Built once at startup and never mutated afterwards. All fields are
/// cheap to clone.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    forwarder: Arc<dyn Forwarder>,
    metrics: Metrics,
}

impl AppState {
    /// Create state with a pooled HTTP forwarder built from the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if metrics registration or HTTP client construction
    /// fails.
    pub fn new(config: Config) -> AppResult<Self> {
        let metrics = Metrics::new()
            .map_err(|e| AppError::Internal(format!("Failed to initialize metrics: {}", e)))?;
        let forwarder = HttpForwarder::new(&config.upstream, metrics.clone())?;
        Ok(Self::with_forwarder(config, Arc::new(forwarder), metrics))
    }

    /// Create state around an existing forwarder
    pub fn with_forwarder(config: Config, forwarder: Arc<dyn Forwarder>, metrics: Metrics) -> Self {
        Self {
            config: Arc::new(config),
            forwarder,
            metrics,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn forwarder(&self) -> &dyn Forwarder {
        self.forwarder.as_ref()
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}

/// Build the application router with all routes and layers
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(openai::completions::handler))
        .route("/health", get(health::handler))
        .route("/metrics", get(metrics::handler))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
