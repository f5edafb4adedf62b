//! Feed service: inbox creation, feed reads and delivery behind one handle

use crate::delivery::{DeliveryPipeline, DeliveryReport};
use crate::feed::FeedMutator;
use crate::message::{xml_safe, MessageDecoder, MimeDecoder};
use crate::resolver::AddressResolver;
use crate::token::{RandomTokens, TokenSource};
use mailfeed_common::types::{is_token_like, FeedLinks};
use mailfeed_common::{Config, Error, Result};
use mailfeed_storage::{AtomCodec, EntryContent, FeedDocument, FeedRepository, Inbox};
use quick_xml::escape::escape;
use std::sync::Arc;
use tracing::{info, warn};

/// Longest accepted inbox name, in characters
pub const MAX_NAME_LENGTH: usize = 500;

/// Inbox token draws before creation gives up on collisions
pub const MAX_INBOX_ATTEMPTS: usize = 5;

/// Owns the storage handle and everything derived from configuration
pub struct FeedService {
    repository: Arc<dyn FeedRepository>,
    codec: AtomCodec,
    tokens: Arc<dyn TokenSource>,
    pipeline: DeliveryPipeline,
    welcome_entry: bool,
}

impl FeedService {
    pub fn new(config: &Config, repository: Arc<dyn FeedRepository>) -> Self {
        let tokens = Arc::new(RandomTokens::new(config.feed.token_length));
        Self::with_parts(config, repository, tokens, Arc::new(MimeDecoder))
    }

    /// Build with explicit token source and decoder
    pub fn with_parts(
        config: &Config,
        repository: Arc<dyn FeedRepository>,
        tokens: Arc<dyn TokenSource>,
        decoder: Arc<dyn MessageDecoder>,
    ) -> Self {
        let codec = AtomCodec::from_config(config);
        let pipeline = DeliveryPipeline::new(
            repository.clone(),
            AddressResolver::new(config.server.hostname.clone(), repository.clone()),
            FeedMutator::new(codec.clone(), config.feed.max_bytes),
            decoder,
            tokens.clone(),
        );

        Self {
            repository,
            codec,
            tokens,
            pipeline,
            welcome_entry: config.feed.welcome_entry,
        }
    }

    pub fn links(&self) -> &FeedLinks {
        self.codec.links()
    }

    pub fn service_name(&self) -> &str {
        self.codec.service_name()
    }

    pub fn pipeline(&self) -> &DeliveryPipeline {
        &self.pipeline
    }

    /// Create an inbox under a fresh token, with an empty feed (or one
    /// holding the welcome entry)
    pub async fn create_inbox(&self, name: &str) -> Result<Inbox> {
        let name = xml_safe(name.trim());
        if name.is_empty() {
            return Err(Error::Validation("Name is required".to_string()));
        }
        if name.chars().count() > MAX_NAME_LENGTH {
            return Err(Error::Validation(format!(
                "Name must be at most {} characters",
                MAX_NAME_LENGTH
            )));
        }

        let inbox = self.create_with_fresh_token(&name).await?;
        info!(inbox = %inbox.token, "Created inbox");

        if self.welcome_entry {
            if let Err(e) = self.pipeline.append(&inbox, self.welcome(&inbox)).await {
                warn!(inbox = %inbox.token, error = %e, "Failed to add welcome entry");
            }
        }

        Ok(inbox)
    }

    async fn create_with_fresh_token(&self, name: &str) -> Result<Inbox> {
        for attempt in 1..=MAX_INBOX_ATTEMPTS {
            let token = self.tokens.next_token();
            match self.repository.create_inbox(&token, name).await {
                Err(e) if e.is_conflict() => {
                    warn!(inbox = %token, attempt, "Inbox token collision, regenerating");
                }
                result => return result,
            }
        }

        Err(Error::Conflict(format!(
            "No free inbox token after {} attempts",
            MAX_INBOX_ATTEMPTS
        )))
    }

    fn welcome(&self, inbox: &Inbox) -> EntryContent {
        let links = self.links();
        EntryContent {
            title: format!("“{}” inbox created", inbox.name),
            author: self.codec.service_name().to_string(),
            content: format!(
                concat!(
                    "<p>Sign up for newsletters with <code>{address}</code>.</p>\n",
                    "<p>Subscribe to <code>{feed}</code> in your feed reader.</p>\n",
                    "<p>Keep both private: the token in them is all anyone needs ",
                    "to send to this feed.</p>\n",
                    "<p><a href=\"{home}\">Create another inbox</a></p>\n",
                ),
                address = escape(&links.address(&inbox.token)),
                feed = escape(&links.feed_url(&inbox.token)),
                home = escape(links.home_url()),
            ),
        }
    }

    pub async fn get_inbox(&self, token: &str) -> Result<Option<Inbox>> {
        if !is_token_like(token) {
            return Ok(None);
        }
        self.repository.get_inbox(token).await
    }

    pub async fn feed(&self, token: &str) -> Result<Option<FeedDocument>> {
        match self.get_inbox(token).await? {
            Some(inbox) => self.repository.get_feed(&inbox).await.map(Some),
            None => Ok(None),
        }
    }

    /// The published Atom document of an inbox
    pub async fn feed_xml(&self, token: &str) -> Result<Option<String>> {
        match self.feed(token).await? {
            Some(feed) => self.codec.serialize(&feed).map(Some),
            None => Ok(None),
        }
    }

    pub async fn deliver(&self, recipients: &[String], data: &[u8]) -> DeliveryReport {
        self.pipeline.deliver(recipients, data).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{backends, config, ScriptedTokens};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_create_inbox_with_welcome_entry() {
        let dir = TempDir::new().unwrap();
        for (backend, repository) in backends(&dir).await {
            let service = FeedService::new(&config(), repository);

            let inbox = service.create_inbox("  Weekly <News>  ").await.unwrap();
            assert_eq!(inbox.name, "Weekly <News>", "{}", backend);
            assert_eq!(inbox.token.len(), 20);
            assert!(is_token_like(&inbox.token));

            let feed = service.feed(&inbox.token).await.unwrap().unwrap();
            assert_eq!(feed.entries.len(), 1, "{}", backend);
            let welcome = &feed.entries[0];
            assert_eq!(welcome.title, "“Weekly <News>” inbox created");
            assert_eq!(welcome.author, "mailfeed");
            assert!(welcome
                .content
                .contains(&format!("{}@feeds.example.com", inbox.token)));
            assert!(welcome.content.contains(&format!(
                "https://feeds.example.com/feeds/{}.xml",
                inbox.token
            )));
        }
    }

    #[tokio::test]
    async fn test_create_inbox_without_welcome_entry() {
        let dir = TempDir::new().unwrap();
        let mut config = config();
        config.feed.welcome_entry = false;

        for (backend, repository) in backends(&dir).await {
            let service = FeedService::new(&config, repository);
            let inbox = service.create_inbox("Foo").await.unwrap();

            let feed = service.feed(&inbox.token).await.unwrap().unwrap();
            assert_eq!(feed, FeedDocument::empty(inbox), "{}", backend);
        }
    }

    #[tokio::test]
    async fn test_create_inbox_validates_name() {
        let dir = TempDir::new().unwrap();
        let (_, repository) = backends(&dir).await.remove(0);
        let service = FeedService::new(&config(), repository);

        assert!(matches!(
            service.create_inbox("   ").await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            service.create_inbox(&"x".repeat(MAX_NAME_LENGTH + 1)).await,
            Err(Error::Validation(_))
        ));
        assert!(service
            .create_inbox(&"é".repeat(MAX_NAME_LENGTH))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_create_inbox_retries_token_collisions() {
        let dir = TempDir::new().unwrap();
        for (backend, repository) in backends(&dir).await {
            let tokens = Arc::new(ScriptedTokens::new(["taken", "taken", "fresh", "w1"]));
            let service = FeedService::with_parts(
                &config(),
                repository.clone(),
                tokens,
                Arc::new(MimeDecoder),
            );
            repository.create_inbox("taken", "Existing").await.unwrap();

            let inbox = service.create_inbox("Foo").await.unwrap();
            assert_eq!(inbox.token, "fresh", "{}", backend);
            assert_eq!(
                service.get_inbox("taken").await.unwrap().unwrap().name,
                "Existing"
            );
        }
    }

    #[tokio::test]
    async fn test_create_inbox_gives_up_after_repeated_collisions() {
        let dir = TempDir::new().unwrap();
        let (_, repository) = backends(&dir).await.remove(0);
        repository.create_inbox("taken", "Existing").await.unwrap();
        let service = FeedService::with_parts(
            &config(),
            repository,
            Arc::new(ScriptedTokens::new(["taken"; MAX_INBOX_ATTEMPTS])),
            Arc::new(MimeDecoder),
        );

        assert!(service.create_inbox("Foo").await.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn test_feed_xml() {
        let dir = TempDir::new().unwrap();
        for (backend, repository) in backends(&dir).await {
            let service = FeedService::new(&config(), repository);
            let inbox = service.create_inbox("Foo & Bar").await.unwrap();

            let xml = service.feed_xml(&inbox.token).await.unwrap().unwrap();
            assert!(xml.contains("<title>Foo &amp; Bar</title>"), "{}", backend);
            assert!(xml.contains(&format!("<id>urn:mailfeed:{}</id>", inbox.token)));

            assert_eq!(service.feed_xml("missing").await.unwrap(), None);
            assert_eq!(service.feed_xml("../../etc/passwd").await.unwrap(), None);
        }
    }
}
