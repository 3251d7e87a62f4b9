use axum::{
    Router,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tracing::info;

use crate::AppState;
use crate::handlers;

/// Routes served by the running controller.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/apply", post(handlers::apply))
        .route(
            "/api/v1/clusterroletemplatebindings",
            get(handlers::list_bindings),
        )
        .route(
            "/api/v1/globalrolebindings/{name}/reconcile",
            post(handlers::reconcile),
        )
        .with_state(state)
}

/// Serve the API on an already bound listener until the task is aborted.
pub async fn serve(listener: TcpListener, state: AppState) -> anyhow::Result<()> {
    info!("Starting API server on {}", listener.local_addr()?);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

