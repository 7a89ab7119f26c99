//! Configuration management for the Bailian proxy
//!
//! Parses TOML configuration files, applies environment overrides and
//! provides typed access to settings.

use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Upper bound for every configured timeout, in seconds
const MAX_TIMEOUT_SECONDS: u64 = 3600;

/// Environment variable overriding `upstream.app_id`
pub const ENV_APP_ID: &str = "BAILIAN_APP_ID";
/// Environment variable overriding `upstream.api_key`
pub const ENV_API_KEY: &str = "BAILIAN_API_KEY";
/// Environment variable overriding `upstream.base_url`
pub const ENV_BASE_URL: &str = "BAILIAN_BASE_URL";
/// Environment variable overriding `server.port`
pub const ENV_PORT: &str = "PORT";

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

/// How requests are presented to the upstream application
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UpstreamMode {
    /// Translate to the native agent-completion protocol
    #[default]
    Native,
    /// Forward OpenAI-format bodies verbatim to the compatible-mode endpoint
    Compatible,
}

impl UpstreamMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Compatible => "compatible",
        }
    }
}

/// API key that never shows up in `Debug` output or logs
#[derive(Clone, Default, Deserialize, Serialize)]
#[serde(transparent)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Get the underlying secret value
    pub fn expose_secret(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiKey([REDACTED])")
    }
}

/// Upstream agent application and transport settings
///
/// Fields are private; values are only produced by deserialization plus
/// `Config::apply_overrides` and checked by `Config::validate`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url")]
    base_url: String,
    #[serde(default)]
    app_id: String,
    #[serde(default)]
    api_key: ApiKey,
    #[serde(default)]
    mode: UpstreamMode,
    /// Model name echoed back when the caller does not send one
    #[serde(default = "default_model")]
    default_model: String,
    #[serde(default = "default_request_timeout")]
    request_timeout_seconds: u64,
    #[serde(default = "default_stream_timeout")]
    stream_timeout_seconds: u64,
    #[serde(default = "default_connect_timeout")]
    connect_timeout_seconds: u64,
    #[serde(default = "default_pool_max_idle_per_host")]
    pool_max_idle_per_host: usize,
    #[serde(default = "default_pool_idle_timeout")]
    pool_idle_timeout_seconds: u64,
}

fn default_base_url() -> String {
    "https://dashscope.aliyuncs.com".to_string()
}

fn default_model() -> String {
    "bailian-agent".to_string()
}

fn default_request_timeout() -> u64 {
    180
}

fn default_stream_timeout() -> u64 {
    600
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_pool_max_idle_per_host() -> usize {
    50
}

fn default_pool_idle_timeout() -> u64 {
    90
}

impl UpstreamConfig {
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn api_key(&self) -> &ApiKey {
        &self.api_key
    }

    pub fn mode(&self) -> UpstreamMode {
        self.mode
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn stream_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_timeout_seconds)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    pub fn pool_max_idle_per_host(&self) -> usize {
        self.pool_max_idle_per_host
    }

    pub fn pool_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.pool_idle_timeout_seconds)
    }

    /// Native agent-completion endpoint for the configured application
    pub fn native_endpoint(&self) -> String {
        format!(
            "{}/api/v1/apps/{}/completion",
            self.base_url.trim_end_matches('/'),
            self.app_id
        )
    }

    /// OpenAI-compatible endpoint for the configured application
    pub fn compatible_endpoint(&self) -> String {
        format!(
            "{}/api/v2/apps/agent/{}/compatible-mode/v1/chat/completions",
            self.base_url.trim_end_matches('/'),
            self.app_id
        )
    }

    /// Endpoint matching the configured mode
    pub fn endpoint(&self) -> String {
        match self.mode {
            UpstreamMode::Native => self.native_endpoint(),
            UpstreamMode::Compatible => self.compatible_endpoint(),
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Environment overrides are applied before validation so secrets can stay
    /// out of the file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path_display = path.as_ref().display().to_string();

        let content = std::fs::read_to_string(path.as_ref()).map_err(|source| {
            AppError::ConfigFileRead {
                path: path_display.clone(),
                source,
            }
        })?;

        let mut config: Self =
            toml::from_str(&content).map_err(|source| AppError::ConfigParseFailed {
                path: path_display.clone(),
                source,
            })?;

        config.apply_overrides(|key| std::env::var(key).ok());

        config
            .validate()
            .map_err(|e| AppError::ConfigValidationFailed {
                path: path_display,
                reason: e.to_string(),
            })?;

        Ok(config)
    }

    /// Apply environment-style overrides using the supplied lookup
    ///
    /// Empty values are ignored. An unparseable `PORT` is logged and ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(app_id) = lookup(ENV_APP_ID) {
            self.upstream.app_id = app_id;
        }
        if let Some(api_key) = lookup(ENV_API_KEY) {
            self.upstream.api_key = ApiKey::new(api_key);
        }
        if let Some(base_url) = lookup(ENV_BASE_URL) {
            self.upstream.base_url = base_url;
        }
        if let Some(port) = lookup(ENV_PORT) {
            match port.parse::<u16>() {
                Ok(port) => self.server.port = port,
                Err(e) => tracing::warn!(
                    value = %port,
                    error = %e,
                    "Ignoring invalid {} override",
                    ENV_PORT
                ),
            }
        }
    }

    /// Validate configuration after parsing
    ///
    /// Called by `from_file()` and `from_str()`, and can be called explicitly
    /// when a config is assembled by other means (e.g., in tests).
    pub fn validate(&self) -> AppResult<()> {
        let upstream = &self.upstream;

        if !upstream.base_url.starts_with("http://") && !upstream.base_url.starts_with("https://")
        {
            return Err(AppError::Config(format!(
                "upstream.base_url '{}' must start with 'http://' or 'https://'",
                upstream.base_url
            )));
        }

        if upstream.app_id.trim().is_empty() {
            return Err(AppError::Config(format!(
                "upstream.app_id must be set (in the config file or via {})",
                ENV_APP_ID
            )));
        }

        if upstream.api_key.is_empty() {
            return Err(AppError::Config(format!(
                "upstream.api_key must be set (in the config file or via {})",
                ENV_API_KEY
            )));
        }

        for (name, value) in [
            ("request_timeout_seconds", upstream.request_timeout_seconds),
            ("stream_timeout_seconds", upstream.stream_timeout_seconds),
            ("connect_timeout_seconds", upstream.connect_timeout_seconds),
            (
                "pool_idle_timeout_seconds",
                upstream.pool_idle_timeout_seconds,
            ),
        ] {
            if value == 0 {
                return Err(AppError::Config(format!(
                    "upstream.{} must be greater than 0",
                    name
                )));
            }
            if value > MAX_TIMEOUT_SECONDS {
                return Err(AppError::Config(format!(
                    "upstream.{} cannot exceed {} seconds, got {}",
                    name, MAX_TIMEOUT_SECONDS, value
                )));
            }
        }

        if upstream.stream_timeout_seconds < upstream.request_timeout_seconds {
            return Err(AppError::Config(format!(
                "upstream.stream_timeout_seconds ({}) must not be shorter than \
                upstream.request_timeout_seconds ({})",
                upstream.stream_timeout_seconds, upstream.request_timeout_seconds
            )));
        }

        Ok(())
    }
}

impl FromStr for Config {
    type Err = AppError;

    /// Parse and validate a TOML string. Environment overrides are not applied.
    fn from_str(toml_str: &str) -> Result<Self, Self::Err> {
        let config: Config =
            toml::from_str(toml_str).map_err(|source| AppError::ConfigParseFailed {
                path: "<string>".to_string(),
                source,
            })?;

        config.validate()?;
        Ok(config)
    }
}
