//! Web UI Routes

use crate::handlers;
use crate::AppState;
use axum::{routing::get, Router};
use tower_http::{compression::CompressionLayer, trace::TraceLayer};

/// Create the web UI router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::index).post(handlers::create_inbox))
        .route("/feeds/:file", get(handlers::feed))
        .route("/health", get(handlers::health))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
