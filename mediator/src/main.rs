mod aggregate;
mod api;
mod audio;
mod broadcast;
mod config;
mod error;
mod metrics;
mod supervisor;
mod upstream;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use config::Config;
use tracing::{error, info};

use broadcast::Broadcaster;
use metrics::Metrics;
use supervisor::Supervisor;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    match run().await {
        Ok(()) => {
            info!("mediator shut down cleanly");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "fatal error during startup or shutdown");
            ExitCode::FAILURE
        }
    }
}

/// Fatal initialization failures (bad listen address, failed bind) surface
/// as an `anyhow::Error` out of here (§6 "Exit codes"); everything past
/// startup is reported through `tracing` and the supervisor's own state
/// instead of by returning `Err`.
async fn run() -> anyhow::Result<()> {
    let config = Arc::new(Config::parse());
    let bind_addr = format!("{}:{}", config.server_host, config.server_port);

    let metrics = Arc::new(Metrics::default());
    let broadcaster = Arc::new(Broadcaster::default());
    let supervisor = Arc::new(Supervisor::new(config.clone(), metrics, broadcaster));

    let router = api::router(supervisor.clone());

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind control surface at {bind_addr}: {e}"))?;
    info!(address = %bind_addr, "control surface listening");

    let serve_result = axum::serve(listener, router).with_graceful_shutdown(wait_for_shutdown_signal()).await;

    supervisor.stop().await;
    serve_result.map_err(|e| anyhow::anyhow!("control surface exited with error: {e}"))
}

/// Waits for SIGINT or (on unix) SIGTERM, whichever arrives first, so a
/// container orchestrator's TERM is honored the same way a local Ctrl-C is.
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
