//! SMTP server implementation

use crate::service::FeedService;
use crate::smtp::SmtpHandler;
use anyhow::Result;
use mailfeed_common::config::{Config, SmtpConfig};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// SMTP Server
pub struct SmtpServer {
    config: SmtpConfig,
    hostname: String,
    service: Arc<FeedService>,
    connection_semaphore: Arc<Semaphore>,
}

impl SmtpServer {
    /// Create a new SMTP server
    pub fn new(config: &Config, service: Arc<FeedService>) -> Self {
        Self {
            config: config.smtp.clone(),
            hostname: config.server.hostname.clone(),
            service,
            connection_semaphore: Arc::new(Semaphore::new(config.smtp.max_connections)),
        }
    }

    /// Bind the configured listen address
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        info!("SMTP server listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    /// Accept connections on `listener` until `shutdown` is cancelled.
    /// Sessions already running are left to finish.
    pub async fn serve(&self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer_addr)) => {
                    let permit = match self.connection_semaphore.clone().try_acquire_owned() {
                        Ok(permit) => permit,
                        Err(_) => {
                            warn!("Max connections reached, rejecting {}", peer_addr);
                            continue;
                        }
                    };

                    let handler = SmtpHandler::new(
                        self.config.clone(),
                        self.hostname.clone(),
                        self.service.clone(),
                        peer_addr,
                    );

                    tokio::spawn(async move {
                        if let Err(e) = handler.handle(stream).await {
                            error!("SMTP session error from {}: {}", peer_addr, e);
                        }
                        drop(permit);
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }

        info!("SMTP server stopped");
        Ok(())
    }
}
