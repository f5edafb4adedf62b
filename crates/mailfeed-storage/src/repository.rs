//! Repository layer for feed data access

pub mod documents;
pub mod feeds;
pub mod sqlite;

pub use documents::DocumentFeedRepository;
pub use feeds::FeedRepository;
pub use sqlite::DbFeedRepository;

use crate::atom::AtomCodec;
use crate::db::DatabasePool;
use crate::file::LocalStorage;
use mailfeed_common::{Config, Error, Result};
use std::sync::Arc;
use tracing::info;

/// Open the feed repository selected by `storage.backend`
pub async fn open_feed_repository(config: &Config) -> Result<Arc<dyn FeedRepository>> {
    match config.storage.backend.as_str() {
        "fs" => {
            let files = LocalStorage::from_path(&config.storage.path)?;
            info!(path = %config.storage.path.display(), "Using document feed storage");
            Ok(Arc::new(DocumentFeedRepository::new(
                files,
                AtomCodec::from_config(config),
            )))
        }
        "sqlite" => {
            let pool = DatabasePool::new(&config.database).await?;
            pool.migrate().await?;
            info!(path = %config.database.path.display(), "Using relational feed storage");
            Ok(Arc::new(DbFeedRepository::new(pool)))
        }
        other => Err(Error::Config(format!(
            "Unsupported storage backend: {}",
            other
        ))),
    }
}
