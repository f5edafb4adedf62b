//! Document feed repository: one Atom file per inbox

use crate::atom::AtomCodec;
use crate::file::{FileStorage, LocalStorage};
use crate::models::{now, FeedDocument, Inbox};
use crate::repository::feeds::FeedRepository;
use async_trait::async_trait;
use mailfeed_common::types::is_token_like;
use mailfeed_common::{Error, Result};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Stores each feed as the published Atom document at `feeds/<token>.xml`.
/// Entry tokens are reserved store-wide by marker files at
/// `entries/<token>` holding the owning inbox token.
pub struct DocumentFeedRepository<S: FileStorage = LocalStorage> {
    files: S,
    codec: AtomCodec,
}

impl<S: FileStorage> DocumentFeedRepository<S> {
    pub fn new(files: S, codec: AtomCodec) -> Self {
        Self { files, codec }
    }

    /// Relative path of an inbox's feed document
    pub fn feed_path(token: &str) -> String {
        format!("feeds/{}.xml", token)
    }

    /// Relative path of the marker reserving an entry token
    pub fn entry_path(token: &str) -> String {
        format!("entries/{}", token)
    }

    /// Reserve entry tokens for `inbox`. Either all are claimed or none.
    async fn claim_entries(&self, inbox: &str, tokens: &[&str]) -> Result<()> {
        let mut claimed = Vec::with_capacity(tokens.len());
        for token in tokens {
            let result = if is_token_like(token) {
                self.files
                    .create(&Self::entry_path(token), inbox.as_bytes())
                    .await
            } else {
                Err(Error::Validation(format!("Invalid entry token: {}", token)))
            };

            if let Err(e) = result {
                self.release_entries(&claimed).await;
                return Err(match e {
                    Error::Conflict(_) => {
                        Error::Conflict(format!("Entry token {} is taken", token))
                    }
                    other => other,
                });
            }
            claimed.push(*token);
        }
        Ok(())
    }

    async fn release_entries(&self, tokens: &[&str]) {
        for token in tokens {
            if let Err(e) = self.files.delete(&Self::entry_path(token)).await {
                warn!(entry = %token, error = %e, "Failed to release entry token");
            }
        }
    }

    async fn load(&self, token: &str) -> Result<Option<FeedDocument>> {
        if !is_token_like(token) {
            return Ok(None);
        }
        let Some(bytes) = self.files.read(&Self::feed_path(token)).await? else {
            return Ok(None);
        };
        let xml = String::from_utf8(bytes)
            .map_err(|e| Error::Feed(format!("Feed {} is not UTF-8: {}", token, e)))?;
        self.codec.parse(&xml).map(Some)
    }
}

#[async_trait]
impl<S: FileStorage> FeedRepository for DocumentFeedRepository<S> {
    async fn create_inbox(&self, token: &str, name: &str) -> Result<Inbox> {
        if !is_token_like(token) {
            return Err(Error::Validation(format!("Invalid inbox token: {}", token)));
        }

        let inbox = Inbox::new(token, name, now());
        let xml = self.codec.serialize(&FeedDocument::empty(inbox.clone()))?;
        self.files
            .create(&Self::feed_path(token), xml.as_bytes())
            .await
            .map_err(|e| match e {
                Error::Conflict(_) => Error::Conflict(format!("Inbox token {} is taken", token)),
                other => other,
            })?;

        debug!(inbox = %token, "Created inbox document");
        Ok(inbox)
    }

    async fn get_inbox(&self, token: &str) -> Result<Option<Inbox>> {
        Ok(self.load(token).await?.map(|feed| feed.inbox))
    }

    async fn get_feed(&self, inbox: &Inbox) -> Result<FeedDocument> {
        self.load(&inbox.token)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Inbox {}", inbox.token)))
    }

    async fn put_feed(&self, feed: &FeedDocument) -> Result<()> {
        if let Some(token) = feed.duplicate_entry_token() {
            return Err(Error::Conflict(format!("Entry token {} is taken", token)));
        }

        let stored = self
            .load(feed.token())
            .await?
            .ok_or_else(|| Error::NotFound(format!("Inbox {}", feed.token())))?;

        let stored_tokens: HashSet<&str> = stored.entries.iter().map(|e| e.token.as_str()).collect();
        let wanted: HashSet<&str> = feed.entries.iter().map(|e| e.token.as_str()).collect();
        let created: Vec<&str> = feed
            .entries
            .iter()
            .map(|e| e.token.as_str())
            .filter(|t| !stored_tokens.contains(t))
            .collect();
        let evicted: Vec<&str> = stored
            .entries
            .iter()
            .map(|e| e.token.as_str())
            .filter(|t| !wanted.contains(t))
            .collect();

        let xml = self.codec.serialize(feed)?;
        self.claim_entries(feed.token(), &created).await?;

        if let Err(e) = self
            .files
            .store(&Self::feed_path(feed.token()), xml.as_bytes())
            .await
        {
            self.release_entries(&created).await;
            return Err(e);
        }
        self.release_entries(&evicted).await;

        debug!(
            inbox = %feed.token(),
            entries = feed.entries.len(),
            created = created.len(),
            evicted = evicted.len(),
            size = xml.len(),
            "Stored feed document"
        );
        Ok(())
    }
}
