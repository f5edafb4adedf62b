//! Database connection and pool management

use mailfeed_common::config::DatabaseConfig;
use mailfeed_common::{Error, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::time::Duration;
use tracing::info;

/// Database pool wrapper
///
/// Reads go through `pool`, writes through the single-connection `writer`.
/// Write transactions must queue on the writer: a deferred transaction
/// upgrading to a write lock held elsewhere fails with `SQLITE_BUSY`.
#[derive(Clone)]
pub struct DatabasePool {
    pool: SqlitePool,
    writer: SqlitePool,
}

impl DatabasePool {
    /// Create a new database pool from configuration
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    Error::Database(format!("Failed to create database directory: {}", e))
                })?;
            }
        }

        info!(path = %config.path.display(), "Connecting to database");

        let options = SqliteConnectOptions::new()
            .filename(&config.path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(10));

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options.clone())
            .await
            .map_err(|e| Error::Database(format!("Failed to connect: {}", e)))?;

        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await
            .map_err(|e| Error::Database(format!("Failed to connect writer: {}", e)))?;

        info!("Database connection established");

        Ok(Self { pool, writer })
    }

    /// Get the underlying pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Pool for write transactions, one connection
    pub fn writer(&self) -> &SqlitePool {
        &self.writer
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.writer)
            .await
            .map_err(|e| Error::Database(format!("Migration failed: {}", e)))?;

        info!("Database migrations completed");
        Ok(())
    }

    /// Close all connections
    pub async fn close(&self) {
        self.pool.close().await;
        self.writer.close().await;
    }
}
