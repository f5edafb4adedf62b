//! Feed mutation: prepend an entry, then evict until the document fits

use chrono::{DateTime, Utc};
use mailfeed_common::Result;
use mailfeed_storage::{now, AtomCodec, Entry, FeedDocument};
use tracing::debug;

/// A feed after merging in one entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Merged {
    pub feed: FeedDocument,
    /// Removed entries, newest first
    pub evicted: Vec<Entry>,
}

/// Applies new entries to feed documents under a serialized size cap
#[derive(Debug, Clone)]
pub struct FeedMutator {
    codec: AtomCodec,
    max_bytes: usize,
}

impl FeedMutator {
    pub fn new(codec: AtomCodec, max_bytes: usize) -> Self {
        Self { codec, max_bytes }
    }

    pub fn codec(&self) -> &AtomCodec {
        &self.codec
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub fn merge(&self, feed: FeedDocument, entry: Entry) -> Result<Merged> {
        self.merge_at(feed, entry, now())
    }

    /// Prepend `entry`, stamp the feed as updated at `at`, then drop the
    /// oldest entries while the document is over the cap. The new entry is
    /// never evicted, even when it alone exceeds the cap.
    pub fn merge_at(
        &self,
        mut feed: FeedDocument,
        entry: Entry,
        at: DateTime<Utc>,
    ) -> Result<Merged> {
        feed.entries.insert(0, entry);
        feed.inbox.updated_at = at;

        let mut size = self.codec.serialized_len(&feed)?;
        let mut evicted = Vec::new();
        while size > self.max_bytes && feed.entries.len() > 1 {
            let Some(oldest) = feed.entries.pop() else {
                break;
            };
            size -= self.codec.entry_len(&oldest)?;
            evicted.push(oldest);
        }
        evicted.reverse();

        if !evicted.is_empty() {
            debug!(
                inbox = %feed.token(),
                evicted = evicted.len(),
                size,
                "Evicted entries over feed size cap"
            );
        }

        Ok(Merged { feed, evicted })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailfeed_common::types::FeedLinks;
    use mailfeed_storage::{EntryContent, Inbox};
    use pretty_assertions::assert_eq;

    fn codec() -> AtomCodec {
        AtomCodec::new(
            FeedLinks::new("feeds.example.com", "https://feeds.example.com/"),
            "mailfeed",
            "mailfeed",
        )
    }

    fn entry(inbox: &Inbox, token: &str, body_len: usize) -> Entry {
        EntryContent {
            title: token.to_string(),
            author: "a@b.com".to_string(),
            content: "x".repeat(body_len),
        }
        .into_entry(token, inbox, now())
    }

    fn tokens(feed: &FeedDocument) -> Vec<&str> {
        feed.entries.iter().map(|e| e.token.as_str()).collect()
    }

    #[test]
    fn test_merge_prepends_and_stamps() {
        let inbox = Inbox::new("abc123", "Foo", now() - chrono::Duration::hours(1));
        let mutator = FeedMutator::new(codec(), 500_000);
        let at = now();

        let first = mutator
            .merge_at(FeedDocument::empty(inbox.clone()), entry(&inbox, "e1", 10), at)
            .unwrap();
        let second = mutator
            .merge_at(first.feed, entry(&inbox, "e2", 10), at)
            .unwrap();

        assert_eq!(tokens(&second.feed), vec!["e2", "e1"]);
        assert_eq!(second.feed.updated_at(), at);
        assert_eq!(second.feed.inbox.created_at, inbox.created_at);
        assert!(second.evicted.is_empty());
    }

    #[test]
    fn test_merge_evicts_oldest_until_under_cap() {
        let inbox = Inbox::new("abc123", "Foo", now());
        let codec = codec();
        let base = codec.serialized_len(&FeedDocument::empty(inbox.clone())).unwrap();
        let one = codec.entry_len(&entry(&inbox, "e0", 1000)).unwrap();
        // Room for exactly three entries
        let mutator = FeedMutator::new(codec.clone(), base + 3 * one);

        let mut feed = FeedDocument::empty(inbox.clone());
        let mut evicted = Vec::new();
        for i in 0..6 {
            let merged = mutator
                .merge(feed, entry(&inbox, &format!("e{}", i), 1000))
                .unwrap();
            assert!(codec.serialized_len(&merged.feed).unwrap() <= mutator.max_bytes());
            evicted.extend(merged.evicted.into_iter().map(|e| e.token));
            feed = merged.feed;
        }

        assert_eq!(tokens(&feed), vec!["e5", "e4", "e3"]);
        assert_eq!(evicted, vec!["e0", "e1", "e2"]);
    }

    #[test]
    fn test_merge_evicts_several_at_once() {
        let inbox = Inbox::new("abc123", "Foo", now());
        let mutator = FeedMutator::new(codec(), 5_000);

        let mut feed = FeedDocument::empty(inbox.clone());
        for i in 0..10 {
            feed = mutator
                .merge(feed, entry(&inbox, &format!("small{}", i), 100))
                .unwrap()
                .feed;
        }
        let before = feed.entries.len();

        let merged = mutator.merge(feed, entry(&inbox, "big", 3_000)).unwrap();
        assert_eq!(merged.feed.entries[0].token, "big");
        assert!(merged.evicted.len() > 1);
        assert_eq!(merged.feed.entries.len() + merged.evicted.len(), before + 1);
        // Oldest went first, the newest small entries survive
        let kept: Vec<String> = merged.feed.entries[1..]
            .iter()
            .map(|e| e.token.clone())
            .collect();
        let expected: Vec<String> = (0..10)
            .rev()
            .take(kept.len())
            .map(|i| format!("small{}", i))
            .collect();
        assert_eq!(kept, expected);
        assert!(codec().serialized_len(&merged.feed).unwrap() <= 5_000);
    }

    #[test]
    fn test_oversized_entry_is_kept_alone() {
        let inbox = Inbox::new("abc123", "Foo", now());
        let mutator = FeedMutator::new(codec(), 2_000);

        let merged = mutator
            .merge(FeedDocument::empty(inbox.clone()), entry(&inbox, "e1", 100))
            .unwrap();
        let merged = mutator
            .merge(merged.feed, entry(&inbox, "huge", 10_000))
            .unwrap();

        assert_eq!(tokens(&merged.feed), vec!["huge"]);
        assert_eq!(merged.evicted.len(), 1);
        assert!(codec().serialized_len(&merged.feed).unwrap() > 2_000);
    }
}
