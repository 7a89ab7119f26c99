//! Telemetry and observability setup
//!
//! Configures structured logging with tracing and tracing-subscriber.

use std::sync::Once;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Initialize tracing subscriber for structured logging
///
/// This can only be called once per process. Subsequent calls are silently ignored.
///
/// Reads the filter from the RUST_LOG environment variable, defaulting to the
/// level specified in config.
///
/// # Examples
///
/// ```no_run
/// bailian_proxy::telemetry::init("info");
/// tracing::info!("Application started");
/// ```
pub fn init(default_level: &str) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_filter(default_level)));

        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    });
}

fn default_filter(level: &str) -> String {
    format!("bailian_proxy={},tower_http=debug", level)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_targets_crate_and_tower_http() {
        let filter = default_filter("warn");
        assert_eq!(filter, "bailian_proxy=warn,tower_http=debug");
        assert!(EnvFilter::try_new(&filter).is_ok());
    }
}
