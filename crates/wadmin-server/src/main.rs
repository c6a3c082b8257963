mod config;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use wadmin_api::{AppStateInner, reachability};
use wadmin_upstream::{GatewayClient, WorkflowClient};

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wadmin=debug,tower_http=debug".into()),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: {:#}", e);
            eprintln!("       Set it in your .env file and restart.");
            std::process::exit(1);
        }
    };

    let db = wadmin_db::Database::open(&config.db_path)?;
    let gateway = GatewayClient::new(&config.gateway_url, &config.gateway_api_key)?;
    let workflow = WorkflowClient::new(&config.workflow_url)?;

    let state = Arc::new(AppStateInner::new(
        db,
        config.jwt_secret.clone(),
        Arc::new(gateway),
        Arc::new(workflow),
    ));

    let cancel = CancellationToken::new();
    let monitor = reachability::spawn_monitor(state.clone(), config.status_interval, cancel.clone());

    let app = wadmin_api::router(state);

    info!("wadmin listening on {}", config.addr);
    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cancel.cancel();
    monitor.await.ok();
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("SIGTERM handler unavailable ({}), waiting for Ctrl+C", e);
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
