//! Server setup and routing.

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{handlers, state::AppState};

/// Create the router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/ws/chat", get(handlers::handle_chat_ws))
        .route("/ws/text_generation", get(handlers::handle_text_generation_ws))
        .route(
            "/v1/branches",
            get(handlers::handle_export_branches).delete(handlers::handle_clear_branches),
        )
        .route("/v1/branches/search", post(handlers::handle_search_branches))
        .route("/health", get(handlers::handle_health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the HTTP server until ctrl-c.
pub async fn run_server(state: AppState) -> Result<(), Box<dyn std::error::Error>> {
    let addr = state.config.bind_addr;
    let sessions = state.sessions.clone();
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "failed to install ctrl-c handler");
                std::future::pending::<()>().await;
            }
            tracing::info!("shutting down");
            sessions.cancel_all();
        })
        .await?;
    Ok(())
}
