//! GAIA External Brain
//!
//! Backend service exposing health/status routes, placeholder orchestration
//! and tools routes, a scheduled job and a WebSocket echo/broadcast channel.

mod config;
mod http;
mod scheduler;
mod server;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use config::{ConfigOverrides, ServiceConfig, CONFIG_FILE};
use http::AppState;
use scheduler::{sample_job, Scheduler, SAMPLE_JOB_ID};
use server::{ConnectionRegistry, ServerConfig, WebSocketServer};

/// GAIA External Brain
///
/// Status API, scheduled jobs and WebSocket broadcast channel
#[derive(Parser, Debug)]
#[command(name = "gaia-brain")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = CONFIG_FILE)]
    config: PathBuf,

    /// Deployment environment reported by /health
    #[arg(long, env = "APP_ENV")]
    app_env: Option<String>,

    /// Bind address
    #[arg(long, env = "GAIA_BIND")]
    bind: Option<String>,

    /// Port of the HTTP API
    #[arg(long, env = "GAIA_HTTP_PORT")]
    http_port: Option<u16>,

    /// Port of the WebSocket endpoint
    #[arg(long, env = "GAIA_WS_PORT")]
    ws_port: Option<u16>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            app_env: self.app_env.clone(),
            bind: self.bind.clone(),
            http_port: self.http_port,
            ws_port: self.ws_port,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let dotenv = dotenvy::dotenv();
    let args = Args::parse();

    // Initialize logging
    let default_level = if args.verbose { "debug" } else { "info" };
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .compact()
        .init();

    info!("GAIA External Brain v{}", env!("CARGO_PKG_VERSION"));
    if let Ok(path) = dotenv {
        info!("Loaded environment from {}", path.display());
    }

    let config = args.overrides().apply(ServiceConfig::load(&args.config)?);
    config.validate()?;
    info!("Environment: {}", config.app_env);

    let registry = Arc::new(ConnectionRegistry::new());
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let scheduler = Scheduler::new();
    scheduler
        .add_job(SAMPLE_JOB_ID, config.job_interval(), sample_job)
        .await;
    info!("Scheduled jobs: {}", scheduler.job_ids().await.join(", "));

    // Subscribe before spawning so an early server failure is never missed
    let mut stopped_rx = shutdown_tx.subscribe();

    let ws_server = Arc::new(WebSocketServer::new(
        ServerConfig::from(&config),
        Arc::clone(&registry),
    ));
    let ws_handle = Arc::clone(&ws_server);
    let ws_stopped = shutdown_tx.clone();
    let ws_task = tokio::spawn(async move {
        let result = ws_handle.run().await;
        let _ = ws_stopped.send(());
        result
    });

    let state = Arc::new(AppState::new(config.app_env.clone(), Arc::clone(&registry)));
    let http_addr = config.http_addr();
    let http_shutdown = shutdown_tx.subscribe();
    let http_stopped = shutdown_tx.clone();
    let http_task = tokio::spawn(async move {
        let result = http::serve(&http_addr, state, http_shutdown).await;
        let _ = http_stopped.send(());
        result
    });

    // Either a signal or one of the servers stopping ends the process
    tokio::select! {
        _ = shutdown_signal() => {}
        _ = stopped_rx.recv() => {
            warn!("A server stopped unexpectedly");
        }
    }
    info!("Shutting down GAIA External Brain...");

    ws_server.shutdown();
    let _ = shutdown_tx.send(());
    scheduler.shutdown().await;

    for (name, task) in [("WebSocket server", ws_task), ("HTTP API", http_task)] {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("{} stopped with error: {}", name, e),
            Err(e) => warn!("{} task failed: {}", name, e),
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }
}
