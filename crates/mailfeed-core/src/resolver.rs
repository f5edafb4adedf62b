//! Recipient address resolution

use mailfeed_common::types::{is_token_like, EmailAddress};
use mailfeed_common::Result;
use mailfeed_storage::{FeedRepository, Inbox};
use std::sync::Arc;

/// Result of resolving one recipient address. Everything except a storage
/// failure is a normal outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Inbox(Inbox),
    /// Not exactly one `@` with non-empty parts
    Invalid,
    /// Domain is not ours
    ForeignDomain,
    /// Well-formed but no inbox has this token
    UnknownInbox,
}

/// Maps `<token>@<hostname>` addresses to inboxes
#[derive(Clone)]
pub struct AddressResolver {
    hostname: String,
    repository: Arc<dyn FeedRepository>,
}

impl AddressResolver {
    pub fn new(hostname: impl Into<String>, repository: Arc<dyn FeedRepository>) -> Self {
        Self {
            hostname: hostname.into(),
            repository,
        }
    }

    pub async fn resolve(&self, raw: &str) -> Result<Resolution> {
        let Some(address) = EmailAddress::parse(raw) else {
            return Ok(Resolution::Invalid);
        };

        if !address.domain.eq_ignore_ascii_case(&self.hostname) {
            return Ok(Resolution::ForeignDomain);
        }

        // Cannot be a token, skip the lookup
        if !is_token_like(&address.local) {
            return Ok(Resolution::UnknownInbox);
        }

        Ok(match self.repository.get_inbox(&address.local).await? {
            Some(inbox) => Resolution::Inbox(inbox),
            None => Resolution::UnknownInbox,
        })
    }
}
