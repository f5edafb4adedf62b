//! mailfeed - newsletters in, Atom feeds out

use anyhow::Result;
use mailfeed_common::config::{Config, LoggingConfig};
use mailfeed_core::{FeedService, SmtpServer};
use mailfeed_storage::open_feed_repository;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Running listeners and the token that stops them
struct Server {
    shutdown: CancellationToken,
    smtp_handle: JoinHandle<()>,
    web_handle: Option<JoinHandle<()>>,
}

impl Server {
    /// Open storage and start the SMTP and web listeners
    async fn start(config: Config) -> Result<Self> {
        let repository = open_feed_repository(&config).await?;
        let service = Arc::new(FeedService::new(&config, repository));
        let shutdown = CancellationToken::new();

        let smtp_server = SmtpServer::new(&config, service.clone());
        let listener = smtp_server.bind().await?;
        let smtp_handle = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                if let Err(e) = smtp_server.serve(listener, shutdown).await {
                    error!("SMTP server error: {}", e);
                }
            })
        };

        let web_handle = if config.web.enabled {
            let web_config = config.web.clone();
            let shutdown = shutdown.clone();
            info!("Starting Web UI server on {}", web_config.bind);

            Some(tokio::spawn(async move {
                if let Err(e) = mailfeed_web::run(&web_config, service, shutdown).await {
                    error!("Web UI server error: {}", e);
                }
            }))
        } else {
            info!("Web UI server disabled");
            None
        };

        Ok(Self {
            shutdown,
            smtp_handle,
            web_handle,
        })
    }

    /// Stop accepting connections and wait for the listeners to exit
    async fn stop(self) {
        self.shutdown.cancel();

        if let Err(e) = self.smtp_handle.await {
            error!("SMTP task failed: {}", e);
        }
        if let Some(handle) = self.web_handle {
            if let Err(e) = handle.await {
                error!("Web UI task failed: {}", e);
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    init_logging(&config.logging);

    info!(
        hostname = %config.server.hostname,
        backend = %config.storage.backend,
        "Starting mailfeed..."
    );

    let server = Server::start(config).await?;
    info!("mailfeed started successfully");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    server.stop().await;
    info!("mailfeed shutdown complete");

    Ok(())
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    let registry = tracing_subscriber::registry().with(filter);
    if config.format == "json" {
        registry
            .with(fmt::layer().json().with_target(true).with_level(true))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
