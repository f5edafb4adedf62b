//! Delivery pipeline: one message, many recipients, one entry per inbox

use crate::feed::FeedMutator;
use crate::locks::InboxLocks;
use crate::message::MessageDecoder;
use crate::resolver::{AddressResolver, Resolution};
use crate::token::TokenSource;
use mailfeed_common::types::{EntryToken, InboxToken};
use mailfeed_common::{Error, Result};
use mailfeed_storage::{now, EntryContent, FeedRepository, Inbox};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Fresh entry tokens tried before a delivery gives up on collisions
pub const MAX_TOKEN_ATTEMPTS: usize = 5;

/// Why a recipient produced no entry without it being an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    InvalidAddress,
    ForeignDomain,
    UnknownInbox,
    /// Another recipient already resolved to the same inbox
    DuplicateInbox,
}

/// What happened to one recipient
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecipientOutcome {
    Delivered {
        inbox: InboxToken,
        entry: EntryToken,
        evicted: usize,
    },
    Skipped(SkipReason),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientReport {
    pub address: String,
    pub outcome: RecipientOutcome,
}

/// Reply owed to the sending peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Accepted,
    /// The peer should retry later
    TransientFailure(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub disposition: Disposition,
    pub recipients: Vec<RecipientReport>,
}

impl DeliveryReport {
    pub fn is_accepted(&self) -> bool {
        self.disposition == Disposition::Accepted
    }

    pub fn delivered(&self) -> usize {
        self.recipients
            .iter()
            .filter(|r| matches!(r.outcome, RecipientOutcome::Delivered { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.recipients
            .iter()
            .filter(|r| matches!(r.outcome, RecipientOutcome::Failed(_)))
            .count()
    }
}

/// An entry written to an inbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Appended {
    pub entry: EntryToken,
    pub evicted: usize,
}

/// Turns received messages into feed entries
pub struct DeliveryPipeline {
    repository: Arc<dyn FeedRepository>,
    resolver: AddressResolver,
    mutator: FeedMutator,
    decoder: Arc<dyn MessageDecoder>,
    tokens: Arc<dyn TokenSource>,
    locks: InboxLocks,
}

impl DeliveryPipeline {
    pub fn new(
        repository: Arc<dyn FeedRepository>,
        resolver: AddressResolver,
        mutator: FeedMutator,
        decoder: Arc<dyn MessageDecoder>,
        tokens: Arc<dyn TokenSource>,
    ) -> Self {
        Self {
            repository,
            resolver,
            mutator,
            decoder,
            tokens,
            locks: InboxLocks::new(),
        }
    }

    /// Decode `data` once and add an entry to every inbox the recipients
    /// name
    pub async fn deliver(&self, recipients: &[String], data: &[u8]) -> DeliveryReport {
        let Some(content) = self.decoder.decode(data) else {
            warn!(size = data.len(), "Could not parse message");
            return DeliveryReport {
                disposition: Disposition::TransientFailure(
                    "message could not be parsed".to_string(),
                ),
                recipients: Vec::new(),
            };
        };
        self.deliver_content(recipients, content).await
    }

    pub async fn deliver_content(
        &self,
        recipients: &[String],
        content: EntryContent,
    ) -> DeliveryReport {
        let mut reports = Vec::with_capacity(recipients.len());
        let mut seen_addresses = HashSet::new();
        let mut seen_inboxes = HashSet::new();
        let mut attempted = 0;

        for address in recipients {
            if !seen_addresses.insert(address.as_str()) {
                continue;
            }

            let outcome = match self.resolver.resolve(address).await {
                Ok(Resolution::Inbox(inbox)) => {
                    if !seen_inboxes.insert(inbox.token.clone()) {
                        RecipientOutcome::Skipped(SkipReason::DuplicateInbox)
                    } else {
                        attempted += 1;
                        self.deliver_to(&inbox, &content).await
                    }
                }
                Ok(Resolution::Invalid) => RecipientOutcome::Skipped(SkipReason::InvalidAddress),
                Ok(Resolution::ForeignDomain) => {
                    RecipientOutcome::Skipped(SkipReason::ForeignDomain)
                }
                Ok(Resolution::UnknownInbox) => RecipientOutcome::Skipped(SkipReason::UnknownInbox),
                Err(e) => {
                    attempted += 1;
                    warn!(recipient = %address, error = %e, "Failed to resolve recipient");
                    RecipientOutcome::Failed(e.to_string())
                }
            };

            if let RecipientOutcome::Skipped(reason) = &outcome {
                debug!(recipient = %address, ?reason, "Skipped recipient");
            }
            reports.push(RecipientReport {
                address: address.clone(),
                outcome,
            });
        }

        let report = DeliveryReport {
            disposition: Disposition::Accepted,
            recipients: reports,
        };
        let delivered = report.delivered();

        if attempted > 0 && delivered == 0 {
            error!(attempted, "Delivery failed for every recipient");
            return DeliveryReport {
                disposition: Disposition::TransientFailure(
                    "no recipient could be delivered".to_string(),
                ),
                ..report
            };
        }

        info!(
            recipients = report.recipients.len(),
            delivered,
            failed = report.failed(),
            "Message accepted"
        );
        report
    }

    async fn deliver_to(&self, inbox: &Inbox, content: &EntryContent) -> RecipientOutcome {
        match self.append(inbox, content.clone()).await {
            Ok(appended) => {
                info!(
                    inbox = %inbox.token,
                    entry = %appended.entry,
                    evicted = appended.evicted,
                    "Delivered entry"
                );
                RecipientOutcome::Delivered {
                    inbox: inbox.token.clone(),
                    entry: appended.entry,
                    evicted: appended.evicted,
                }
            }
            Err(e) => {
                warn!(inbox = %inbox.token, error = %e, "Failed to deliver entry");
                RecipientOutcome::Failed(e.to_string())
            }
        }
    }

    /// Fetch the inbox's feed, merge in a new entry and persist it, all
    /// while holding the inbox's lock. Entry token collisions are retried
    /// with fresh tokens.
    pub async fn append(&self, inbox: &Inbox, content: EntryContent) -> Result<Appended> {
        let _guard = self.locks.lock(&inbox.token).await;
        let feed = self.repository.get_feed(inbox).await?;

        for attempt in 1..=MAX_TOKEN_ATTEMPTS {
            let at = now();
            let entry = content.clone().into_entry(self.tokens.next_token(), inbox, at);
            let token = entry.token.clone();
            let merged = self.mutator.merge_at(feed.clone(), entry, at)?;

            match self.repository.put_feed(&merged.feed).await {
                Ok(()) => {
                    return Ok(Appended {
                        entry: token,
                        evicted: merged.evicted.len(),
                    })
                }
                Err(e) if e.is_conflict() => {
                    warn!(
                        inbox = %inbox.token,
                        entry = %token,
                        attempt,
                        "Entry token collision, regenerating"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::Conflict(format!(
            "No free entry token for inbox {} after {} attempts",
            inbox.token, MAX_TOKEN_ATTEMPTS
        )))
    }
}
