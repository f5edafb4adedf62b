//! mailfeed Core - SMTP ingestion and feed maintenance
//!
//! This crate turns received messages into feed entries: it resolves
//! recipients to inboxes, decodes the message once, and merges one entry
//! into each inbox's feed under the size cap.

pub mod delivery;
pub mod feed;
pub mod locks;
pub mod message;
pub mod resolver;
pub mod service;
pub mod smtp;
pub mod token;

#[cfg(test)]
mod testing;

pub use delivery::{
    DeliveryPipeline, DeliveryReport, Disposition, RecipientOutcome, RecipientReport, SkipReason,
};
pub use feed::{FeedMutator, Merged};
pub use locks::InboxLocks;
pub use message::{MessageDecoder, MimeDecoder};
pub use resolver::{AddressResolver, Resolution};
pub use service::FeedService;
pub use smtp::SmtpServer;
pub use token::{RandomTokens, TokenSource};
