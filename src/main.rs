//! bailian-proxy HTTP server
//!
//! Starts an Axum web server that translates OpenAI chat-completion requests
//! for a Bailian agent application.

use bailian_proxy::{
    cli::{Cli, Command, generate_config_template},
    config::Config,
    handlers::{self, AppState},
    telemetry,
};
use clap::Parser;
use std::net::SocketAddr;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Some(Command::Config { output }) = cli.command {
        let template = generate_config_template();
        match output {
            Some(path) => {
                std::fs::write(&path, template)?;
                eprintln!("Configuration template written to {}", path);
            }
            None => print!("{}", template),
        }
        return Ok(());
    }

    let config = Config::from_file(&cli.config)?;

    telemetry::init(&config.observability.log_level);

    tracing::info!(
        config_path = %cli.config,
        mode = config.upstream.mode().as_str(),
        endpoint = %config.upstream.endpoint(),
        request_timeout_seconds = config.upstream.request_timeout().as_secs(),
        stream_timeout_seconds = config.upstream.stream_timeout().as_secs(),
        "Starting bailian-proxy on {}:{}",
        config.server.host,
        config.server.port
    );

    let addr = SocketAddr::from((
        config
            .server
            .host
            .parse::<std::net::IpAddr>()
            .unwrap_or_else(|_| std::net::IpAddr::from([0, 0, 0, 0])),
        config.server.port,
    ));

    let state = AppState::new(config)?;
    let app = handlers::app(state);

    tracing::info!("Listening on {}", addr);
    tracing::info!("Chat completions available at http://{}/v1/chat/completions", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, draining connections");
}
