//! File storage abstraction

use async_trait::async_trait;
use mailfeed_common::{Error, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// File storage trait
#[async_trait]
pub trait FileStorage: Send + Sync {
    /// Replace a file atomically: readers see either the old or the new
    /// content, never a partial write
    async fn store(&self, path: &str, data: &[u8]) -> Result<()>;

    /// Create a file that must not exist yet. Fails with
    /// [`Error::Conflict`] when it does.
    async fn create(&self, path: &str, data: &[u8]) -> Result<()>;

    /// Read a file, `None` when it does not exist
    async fn read(&self, path: &str) -> Result<Option<Vec<u8>>>;

    /// Delete a file. Deleting a missing file is not an error.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Check if a file exists
    async fn exists(&self, path: &str) -> Result<bool>;
}

/// Local filesystem storage
pub struct LocalStorage {
    base_path: PathBuf,
    temp_counter: AtomicU64,
}

impl LocalStorage {
    /// Create a new local storage instance rooted at `path`
    pub fn from_path(path: &Path) -> Result<Self> {
        // Ensure base directory exists
        std::fs::create_dir_all(path)
            .map_err(|e| Error::Storage(format!("Failed to create storage directory: {}", e)))?;

        info!(path = %path.display(), "Initialized local file storage");

        Ok(Self {
            base_path: path.to_path_buf(),
            temp_counter: AtomicU64::new(0),
        })
    }

    /// Get full path for a relative path, with path traversal protection
    fn full_path(&self, path: &str) -> Result<PathBuf> {
        if path.contains("..") {
            return Err(Error::Storage(
                "Path traversal detected: '..' is not allowed".to_string(),
            ));
        }

        if path.starts_with('/') || path.starts_with('\\') {
            return Err(Error::Storage("Absolute paths are not allowed".to_string()));
        }

        Ok(self.base_path.join(path))
    }

    /// Sibling temporary path, unique within this process
    fn temp_path(&self, full_path: &Path) -> PathBuf {
        let n = self.temp_counter.fetch_add(1, Ordering::Relaxed);
        let name = full_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        full_path.with_file_name(format!(".{}.{}.{}.tmp", name, std::process::id(), n))
    }

    async fn ensure_parent_exists(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Storage(format!("Failed to create directory: {}", e)))?;
        }
        Ok(())
    }

    /// Write `data` to a fresh temporary file next to `full_path` and flush
    /// it to disk
    async fn write_temp(&self, full_path: &Path, data: &[u8]) -> Result<PathBuf> {
        self.ensure_parent_exists(full_path).await?;
        let temp = self.temp_path(full_path);

        let result = async {
            let mut file = fs::File::create(&temp).await?;
            file.write_all(data).await?;
            file.sync_all().await
        }
        .await;

        if let Err(e) = result {
            let _ = fs::remove_file(&temp).await;
            return Err(Error::Storage(format!("Failed to write file: {}", e)));
        }
        Ok(temp)
    }
}

#[async_trait]
impl FileStorage for LocalStorage {
    async fn store(&self, path: &str, data: &[u8]) -> Result<()> {
        let full_path = self.full_path(path)?;
        let temp = self.write_temp(&full_path, data).await?;

        if let Err(e) = fs::rename(&temp, &full_path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(Error::Storage(format!("Failed to replace file: {}", e)));
        }

        debug!(path = %path, size = data.len(), "Stored file");
        Ok(())
    }

    async fn create(&self, path: &str, data: &[u8]) -> Result<()> {
        let full_path = self.full_path(path)?;
        let temp = self.write_temp(&full_path, data).await?;

        // hard_link refuses to overwrite, so the check and the publish are
        // one step
        let linked = fs::hard_link(&temp, &full_path).await;
        let _ = fs::remove_file(&temp).await;

        match linked {
            Ok(()) => {
                debug!(path = %path, size = data.len(), "Created file");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(Error::Conflict(format!("File already exists: {}", path)))
            }
            Err(e) => Err(Error::Storage(format!("Failed to create file: {}", e))),
        }
    }

    async fn read(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let full_path = self.full_path(path)?;

        match fs::read(&full_path).await {
            Ok(data) => {
                debug!(path = %path, size = data.len(), "Read file");
                Ok(Some(data))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Storage(format!("Failed to read file: {}", e))),
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let full_path = self.full_path(path)?;

        match fs::remove_file(&full_path).await {
            Ok(()) => {
                debug!(path = %path, "Deleted file");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Storage(format!("Failed to delete file: {}", e))),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let full_path = self.full_path(path)?;
        fs::try_exists(&full_path)
            .await
            .map_err(|e| Error::Storage(format!("Failed to stat file: {}", e)))
    }
}
