mod routes;
mod schemas;
mod state;

use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use log::info;
use sr_core::Coordinator;
use tokio::net::TcpListener;

use crate::backend::routes::api_routes;
use crate::backend::state::AppState;
use crate::config::AppConfig;

pub async fn serve(config: &AppConfig, coordinator: Coordinator) -> anyhow::Result<()> {
    let state = AppState::new(coordinator.clone());

    let app = Router::new()
        .merge(api_routes())
        .with_state(Arc::new(state));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Starting backend server on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("failed to listen for shutdown signal: {e}");
                return;
            }
            info!("Shutting down, cancelling running jobs");
            coordinator.shutdown();
        })
        .await
        .context("server failed")
}
