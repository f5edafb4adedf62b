//! Feed document model

use chrono::{DateTime, SubsecRound, Utc};
use mailfeed_common::types::{EntryToken, InboxToken};
use sqlx::FromRow;

/// Current time at the precision feed documents carry (milliseconds)
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// A named destination for newsletters, owning one feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbox {
    pub token: InboxToken,
    pub name: String,
    pub created_at: DateTime<Utc>,
    /// Refreshed whenever an entry is added
    pub updated_at: DateTime<Utc>,
}

impl Inbox {
    pub fn new(token: impl Into<InboxToken>, name: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            token: token.into(),
            name: name.into(),
            created_at: at,
            updated_at: at,
        }
    }
}

/// One feed item derived from one message delivered to one inbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub token: EntryToken,
    pub inbox: InboxToken,
    pub title: String,
    pub author: String,
    /// HTML
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Fields shared by every entry created from one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryContent {
    pub title: String,
    pub author: String,
    pub content: String,
}

impl EntryContent {
    /// Bind this content to an inbox under a fresh entry token
    pub fn into_entry(
        self,
        token: impl Into<EntryToken>,
        inbox: &Inbox,
        at: DateTime<Utc>,
    ) -> Entry {
        Entry {
            token: token.into(),
            inbox: inbox.token.clone(),
            title: self.title,
            author: self.author,
            content: self.content,
            created_at: at,
        }
    }
}

/// The published aggregate for one inbox: its metadata plus entries,
/// most recent first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedDocument {
    pub inbox: Inbox,
    pub entries: Vec<Entry>,
}

impl FeedDocument {
    /// Initial document of a freshly created inbox
    pub fn empty(inbox: Inbox) -> Self {
        Self {
            inbox,
            entries: Vec::new(),
        }
    }

    pub fn token(&self) -> &str {
        &self.inbox.token
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.inbox.updated_at
    }

    /// First entry token that appears more than once, if any
    pub fn duplicate_entry_token(&self) -> Option<&str> {
        let mut seen = std::collections::HashSet::new();
        self.entries
            .iter()
            .map(|e| e.token.as_str())
            .find(|token| !seen.insert(*token))
    }
}

/// Inbox row (relational backend)
#[derive(Debug, Clone, FromRow)]
pub struct InboxRow {
    pub id: i64,
    pub token: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<InboxRow> for Inbox {
    fn from(row: InboxRow) -> Self {
        Self {
            token: row.token,
            name: row.name,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Entry row (relational backend)
#[derive(Debug, Clone, FromRow)]
pub struct EntryRow {
    pub id: i64,
    pub token: String,
    pub inbox_id: i64,
    pub title: String,
    pub author: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl EntryRow {
    pub fn into_entry(self, inbox: &str) -> Entry {
        Entry {
            token: self.token,
            inbox: inbox.to_string(),
            title: self.title,
            author: self.author,
            content: self.content,
            created_at: self.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_entry_token() {
        let at = now();
        let inbox = Inbox::new("inbox", "Foo", at);
        let content = EntryContent {
            title: "Hi".to_string(),
            author: "a@b.com".to_string(),
            content: "<p>hi</p>".to_string(),
        };

        let mut doc = FeedDocument::empty(inbox.clone());
        doc.entries.push(content.clone().into_entry("one", &inbox, at));
        doc.entries.push(content.clone().into_entry("two", &inbox, at));
        assert_eq!(doc.duplicate_entry_token(), None);

        doc.entries.push(content.into_entry("one", &inbox, at));
        assert_eq!(doc.duplicate_entry_token(), Some("one"));
    }

    #[test]
    fn test_now_is_millisecond_precision() {
        assert_eq!(now().timestamp_subsec_nanos() % 1_000_000, 0);
    }
}
