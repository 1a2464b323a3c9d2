//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::OrchestratorError;
use crate::server::handlers::{
    add_context_handler, cancel_job_handler, deploy_handler, health_handler,
    inspect_context_handler, job_status_handler, list_contexts_handler, list_jobs_handler,
    remove_context_handler, update_files_handler, version_handler,
};
use crate::server::state::ServerState;

/// Build the API router
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        // Contexts
        .route("/contexts", get(list_contexts_handler).post(add_context_handler))
        .route("/contexts/{name}", delete(remove_context_handler))
        .route("/contexts/{name}/inspect", get(inspect_context_handler))
        .route("/contexts/{name}/files", post(update_files_handler))
        // Deployments
        .route("/deployments", get(list_jobs_handler).post(deploy_handler))
        .route("/deployments/{id}", get(job_status_handler))
        .route("/deployments/{id}/cancel", post(cancel_job_handler))
        // State and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), OrchestratorError>>, OrchestratorError> {
    let app = router(state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| OrchestratorError::ServerError(e.to_string()))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| OrchestratorError::ServerError(e.to_string()))
    });

    Ok(handle)
}
