//! Feed repository contract

use crate::models::{FeedDocument, Inbox};
use async_trait::async_trait;
use mailfeed_common::Result;

/// Durable storage of inboxes and their feed documents
///
/// Token uniqueness is enforced here: `create_inbox` and `put_feed` report
/// collisions as [`mailfeed_common::Error::Conflict`] and leave stored state
/// untouched.
#[async_trait]
pub trait FeedRepository: Send + Sync {
    /// Atomically insert a new inbox with an empty feed
    async fn create_inbox(&self, token: &str, name: &str) -> Result<Inbox>;

    /// Look up an inbox by token
    async fn get_inbox(&self, token: &str) -> Result<Option<Inbox>>;

    /// Current feed of an existing inbox
    async fn get_feed(&self, inbox: &Inbox) -> Result<FeedDocument>;

    /// Persist a whole feed document. Entries not stored yet are created,
    /// entries missing from the document are evicted and the inbox
    /// `updated_at` is written, all or nothing.
    async fn put_feed(&self, feed: &FeedDocument) -> Result<()>;
}
