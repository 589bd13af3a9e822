//! HTTP surface: tool catalog and execution, config, and the worker proxy.

pub mod config;
pub mod error;
pub mod server;
pub mod stream;
pub mod tools;
pub mod workers;

pub use error::{ApiError, GatewayError};
pub use server::Server;

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;

pub fn router(server: Arc<Server>) -> Router {
    Router::new()
        .route("/health", get(tools::health))
        .route("/tools", get(tools::list_tools).head(tools::head_tools))
        .route("/execute", post(tools::execute))
        .route("/debug", post(tools::debug))
        .route("/config", get(config::get_config).post(config::post_config))
        .route("/workers", get(workers::list_workers))
        .route("/workers/{name}/realtime/status", get(workers::worker_status))
        .route("/workers/{name}/realtime/cancel", post(workers::cancel_worker))
        .route("/workers/{name}/tool/query", post(workers::query_worker))
        .with_state(server)
}

/// Serves until Ctrl-C.
pub async fn serve(server: Arc<Server>) -> Result<(), GatewayError> {
    let addr = server.settings().bind.clone();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|source| GatewayError::Bind {
            addr: addr.clone(),
            source,
        })?;
    tracing::info!(
        addr = %addr,
        tools = server.registry().len(),
        tools_dir = %server.settings().tools_dir.display(),
        "gateway listening"
    );
    axum::serve(listener, router(server))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await
        .map_err(|source| GatewayError::Serve { source })
}
