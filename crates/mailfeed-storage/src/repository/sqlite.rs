//! Relational feed repository: inbox and entry rows in SQLite

use crate::db::DatabasePool;
use crate::models::{now, EntryRow, FeedDocument, Inbox, InboxRow};
use crate::repository::feeds::FeedRepository;
use async_trait::async_trait;
use mailfeed_common::{Error, Result};
use std::collections::HashSet;
use tracing::debug;

/// Database feed repository
pub struct DbFeedRepository {
    pool: DatabasePool,
}

impl DbFeedRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

/// Map a database error, surfacing UNIQUE violations as conflicts
fn db_error(what: &str, e: sqlx::Error) -> Error {
    match e.as_database_error() {
        Some(db) if db.is_unique_violation() => Error::Conflict(format!("{}: {}", what, db)),
        _ => Error::Database(format!("{}: {}", what, e)),
    }
}

#[async_trait]
impl FeedRepository for DbFeedRepository {
    async fn create_inbox(&self, token: &str, name: &str) -> Result<Inbox> {
        let at = now();

        let row = sqlx::query_as::<_, InboxRow>(
            r#"
            INSERT INTO inboxes (token, name, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(token)
        .bind(name)
        .bind(at)
        .bind(at)
        .fetch_one(self.pool.writer())
        .await
        .map_err(|e| db_error("Failed to create inbox", e))?;

        debug!(inbox = %token, id = row.id, "Created inbox row");
        Ok(row.into())
    }

    async fn get_inbox(&self, token: &str) -> Result<Option<Inbox>> {
        sqlx::query_as::<_, InboxRow>("SELECT * FROM inboxes WHERE token = ?")
            .bind(token)
            .fetch_optional(self.pool.pool())
            .await
            .map(|row| row.map(Inbox::from))
            .map_err(|e| db_error("Failed to get inbox", e))
    }

    async fn get_feed(&self, inbox: &Inbox) -> Result<FeedDocument> {
        let mut tx = self
            .pool
            .pool()
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin transaction", e))?;

        let row = sqlx::query_as::<_, InboxRow>("SELECT * FROM inboxes WHERE token = ?")
            .bind(&inbox.token)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to get inbox", e))?
            .ok_or_else(|| Error::NotFound(format!("Inbox {}", inbox.token)))?;

        // Row ids grow with insertion, so this is newest first
        let entries = sqlx::query_as::<_, EntryRow>(
            "SELECT * FROM entries WHERE inbox_id = ? ORDER BY id DESC",
        )
        .bind(row.id)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to list entries", e))?;

        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit", e))?;

        let token = row.token.clone();
        Ok(FeedDocument {
            inbox: row.into(),
            entries: entries.into_iter().map(|e| e.into_entry(&token)).collect(),
        })
    }

    async fn put_feed(&self, feed: &FeedDocument) -> Result<()> {
        if let Some(token) = feed.duplicate_entry_token() {
            return Err(Error::Conflict(format!("Entry token {} is taken", token)));
        }

        let mut tx = self
            .pool
            .writer()
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin transaction", e))?;

        let inbox_id = sqlx::query_scalar::<_, i64>("SELECT id FROM inboxes WHERE token = ?")
            .bind(feed.token())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to get inbox", e))?
            .ok_or_else(|| Error::NotFound(format!("Inbox {}", feed.token())))?;

        let stored = sqlx::query_scalar::<_, String>("SELECT token FROM entries WHERE inbox_id = ?")
            .bind(inbox_id)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to list entry tokens", e))?;
        let stored: HashSet<String> = stored.into_iter().collect();
        let wanted: HashSet<&str> = feed.entries.iter().map(|e| e.token.as_str()).collect();

        let mut evicted = 0;
        for token in stored.iter().filter(|t| !wanted.contains(t.as_str())) {
            sqlx::query("DELETE FROM entries WHERE inbox_id = ? AND token = ?")
                .bind(inbox_id)
                .bind(token)
                .execute(&mut *tx)
                .await
                .map_err(|e| db_error("Failed to evict entry", e))?;
            evicted += 1;
        }

        // Oldest first so row ids keep insertion order
        let mut created = 0;
        for entry in feed.entries.iter().rev() {
            if stored.contains(&entry.token) {
                continue;
            }
            sqlx::query(
                r#"
                INSERT INTO entries (token, inbox_id, title, author, content, created_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&entry.token)
            .bind(inbox_id)
            .bind(&entry.title)
            .bind(&entry.author)
            .bind(&entry.content)
            .bind(entry.created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to create entry", e))?;
            created += 1;
        }

        sqlx::query("UPDATE inboxes SET updated_at = ? WHERE id = ?")
            .bind(feed.updated_at())
            .bind(inbox_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to touch inbox", e))?;

        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit", e))?;

        debug!(
            inbox = %feed.token(),
            created,
            evicted,
            "Stored feed rows"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntryContent;
    use mailfeed_common::config::DatabaseConfig;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    async fn repository(dir: &TempDir) -> DbFeedRepository {
        let config = DatabaseConfig {
            path: dir.path().join("mailfeed.db"),
            max_connections: 4,
            min_connections: 1,
        };
        let pool = DatabasePool::new(&config).await.unwrap();
        pool.migrate().await.unwrap();
        DbFeedRepository::new(pool)
    }

    fn content(title: &str) -> EntryContent {
        EntryContent {
            title: title.to_string(),
            author: "a@b.com".to_string(),
            content: format!("<p>{}</p>", title),
        }
    }

    #[tokio::test]
    async fn test_create_and_get_inbox() {
        let dir = TempDir::new().unwrap();
        let repo = repository(&dir).await;

        let inbox = repo.create_inbox("abc123", "Foo").await.unwrap();
        assert_eq!(inbox.name, "Foo");
        assert_eq!(repo.get_inbox("abc123").await.unwrap(), Some(inbox.clone()));
        assert_eq!(repo.get_inbox("missing").await.unwrap(), None);
        assert_eq!(
            repo.get_feed(&inbox).await.unwrap(),
            FeedDocument::empty(inbox)
        );
    }

    #[tokio::test]
    async fn test_create_inbox_conflict() {
        let dir = TempDir::new().unwrap();
        let repo = repository(&dir).await;

        repo.create_inbox("abc123", "Foo").await.unwrap();
        let err = repo.create_inbox("abc123", "Bar").await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_put_feed_creates_and_evicts() {
        let dir = TempDir::new().unwrap();
        let repo = repository(&dir).await;
        let inbox = repo.create_inbox("abc123", "Foo").await.unwrap();

        let mut feed = repo.get_feed(&inbox).await.unwrap();
        for (i, token) in ["e1", "e2", "e3"].iter().enumerate() {
            let entry = content(&format!("msg {}", i)).into_entry(*token, &inbox, now());
            feed.entries.insert(0, entry);
        }
        feed.inbox.updated_at = now();
        repo.put_feed(&feed).await.unwrap();
        assert_eq!(repo.get_feed(&inbox).await.unwrap(), feed);

        // Drop the oldest, add a newer one
        feed.entries.pop();
        feed.entries
            .insert(0, content("msg 3").into_entry("e4", &inbox, now()));
        repo.put_feed(&feed).await.unwrap();

        let stored = repo.get_feed(&inbox).await.unwrap();
        let tokens: Vec<&str> = stored.entries.iter().map(|e| e.token.as_str()).collect();
        assert_eq!(tokens, vec!["e4", "e3", "e2"]);
    }

    #[tokio::test]
    async fn test_entry_token_unique_across_inboxes() {
        let dir = TempDir::new().unwrap();
        let repo = repository(&dir).await;
        let first = repo.create_inbox("first", "First").await.unwrap();
        let second = repo.create_inbox("second", "Second").await.unwrap();

        let mut feed = repo.get_feed(&first).await.unwrap();
        feed.entries.push(content("a").into_entry("shared", &first, now()));
        repo.put_feed(&feed).await.unwrap();

        let before = repo.get_feed(&second).await.unwrap();
        let mut other = before.clone();
        other.inbox.updated_at = now() + chrono::Duration::seconds(5);
        other.entries.push(content("b").into_entry("shared", &second, now()));

        assert!(repo.put_feed(&other).await.unwrap_err().is_conflict());
        // The failed write left nothing behind, updated_at included
        assert_eq!(repo.get_feed(&second).await.unwrap(), before);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writes_to_distinct_inboxes() {
        let dir = TempDir::new().unwrap();
        let repo = std::sync::Arc::new(repository(&dir).await);
        for i in 0..16 {
            repo.create_inbox(&format!("inbox{}", i), "Foo").await.unwrap();
        }

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let repo = repo.clone();
                tokio::spawn(async move {
                    let inbox = repo.get_inbox(&format!("inbox{}", i)).await?.unwrap();
                    let mut feed = repo.get_feed(&inbox).await?;
                    feed.entries
                        .insert(0, content("hi").into_entry(format!("entry{}", i), &inbox, now()));
                    feed.inbox.updated_at = now();
                    repo.put_feed(&feed).await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        for i in 0..16 {
            let inbox = repo.get_inbox(&format!("inbox{}", i)).await.unwrap().unwrap();
            assert_eq!(repo.get_feed(&inbox).await.unwrap().entries.len(), 1);
        }
    }
}
