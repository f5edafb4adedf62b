//! mailfeed Web UI
//!
//! Inbox creation form and the published Atom feeds.

mod error;
mod handlers;
mod routes;
mod templates;

pub use error::WebError;

use axum::Router;
use mailfeed_common::config::WebConfig;
use mailfeed_core::FeedService;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Application state for the web UI
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<FeedService>,
    pub templates: Arc<templates::Templates>,
}

impl AppState {
    /// Create a new app state
    pub fn new(service: Arc<FeedService>) -> anyhow::Result<Self> {
        Ok(Self {
            service,
            templates: Arc::new(templates::Templates::new()?),
        })
    }
}

/// Create the web UI router
pub fn create_router(state: AppState) -> Router {
    routes::create_router(state)
}

/// Run the web UI server until `shutdown` is cancelled
pub async fn run(
    config: &WebConfig,
    service: Arc<FeedService>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let app = create_router(AppState::new(service)?);

    let listener = tokio::net::TcpListener::bind(&config.bind).await?;
    tracing::info!("Web UI listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    tracing::info!("Web UI stopped");
    Ok(())
}
