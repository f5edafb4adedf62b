//! Common types for mailfeed

use crate::config::ServerConfig;
use serde::{Deserialize, Serialize};

/// Opaque token identifying an inbox. Doubles as the address local part and
/// the feed path component.
pub type InboxToken = String;

/// Opaque token identifying an entry
pub type EntryToken = String;

/// Characters tokens are drawn from
pub const TOKEN_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Whether `s` could have been produced by the token generator
pub fn is_token_like(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| TOKEN_ALPHABET.contains(&b))
}

/// Email address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmailAddress {
    pub local: String,
    pub domain: String,
}

impl EmailAddress {
    /// Create a new email address
    pub fn new(local: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            domain: domain.into(),
        }
    }

    /// Parse an address with exactly one `@` and non-empty parts on both sides
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.split('@');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(local), Some(domain), None) if !local.is_empty() && !domain.is_empty() => {
                Some(Self::new(local, domain))
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.local, self.domain)
    }
}

impl std::str::FromStr for EmailAddress {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| crate::Error::Validation("Invalid email address".to_string()))
    }
}

/// Message envelope (SMTP level)
#[derive(Debug, Clone, Default)]
pub struct Envelope {
    /// Sender (MAIL FROM), `None` for the null sender
    pub from: Option<String>,

    /// Raw recipient addresses (RCPT TO), in the order received
    pub recipients: Vec<String>,

    /// HELO/EHLO hostname
    pub helo: Option<String>,
}

/// Public addresses derived from an inbox token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedLinks {
    hostname: String,
    home_url: String,
}

impl FeedLinks {
    pub fn new(hostname: impl Into<String>, home_url: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            home_url: home_url.into(),
        }
    }

    pub fn from_config(server: &ServerConfig) -> Self {
        Self::new(server.hostname.clone(), server.home_url())
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn home_url(&self) -> &str {
        &self.home_url
    }

    /// `https://<hostname>/feeds/<token>.xml`
    pub fn feed_url(&self, token: &str) -> String {
        format!("https://{}/feeds/{}.xml", self.hostname, token)
    }

    /// `<token>@<hostname>`
    pub fn address(&self, token: &str) -> String {
        format!("{}@{}", token, self.hostname)
    }
}
