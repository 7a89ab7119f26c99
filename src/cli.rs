//! Command-line interface for the Bailian proxy
//!
//! Provides argument parsing and subcommand handling for the binary.

use clap::{Parser, Subcommand};

/// OpenAI-compatible gateway for Bailian agent applications
#[derive(Parser)]
#[command(name = "bailian-proxy")]
#[command(version)]
#[command(about = "OpenAI-compatible gateway for Bailian agent applications")]
#[command(
    long_about = "bailian-proxy accepts OpenAI chat-completion requests and forwards them to a \
    Bailian agent application, translating requests, responses, errors and event streams \
    between the two protocols."
)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml", global = true)]
    pub config: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Generate a template configuration file
    Config {
        /// Output file path (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<String>,
    },
}

/// Generate template configuration content
pub fn generate_config_template() -> &'static str {
    r#"# bailian-proxy Configuration
# ===========================
#
# Every [upstream] value can also be supplied through the environment:
#   BAILIAN_APP_ID, BAILIAN_API_KEY, BAILIAN_BASE_URL (and PORT for [server]).
# Environment values take precedence over this file.

# ─────────────────────────────────────────────────────────────────────────────
# SERVER CONFIGURATION
# ─────────────────────────────────────────────────────────────────────────────

[server]
# IP address to bind to (0.0.0.0 for all interfaces, 127.0.0.1 for localhost only)
host = "0.0.0.0"

# Port to listen on
port = 8080

# ─────────────────────────────────────────────────────────────────────────────
# UPSTREAM AGENT APPLICATION
# ─────────────────────────────────────────────────────────────────────────────

[upstream]
base_url = "https://dashscope.aliyuncs.com"
app_id = "your-app-id"
api_key = "sk-your-api-key"

# Protocol spoken to the upstream:
#   - "native": translate to the agent-completion API (recommended)
#   - "compatible": forward OpenAI bodies verbatim to the compatible-mode endpoint
mode = "native"

# Model name reported back when a request omits "model"
default_model = "bailian-agent"

# Timeouts in seconds. Streaming calls stay open for the whole exchange,
# so they get a separate, longer budget.
request_timeout_seconds = 180
stream_timeout_seconds = 600
connect_timeout_seconds = 10

# Connection pool sizing
pool_max_idle_per_host = 50
pool_idle_timeout_seconds = 90

# ─────────────────────────────────────────────────────────────────────────────
# OBSERVABILITY
# ─────────────────────────────────────────────────────────────────────────────

[observability]
# Log level: "trace", "debug", "info", "warn", "error"
log_level = "info"

# Prometheus metrics are always available at /metrics on the server port
"#
}
