//! Atom serializer and parser for feed documents
//!
//! Feed and entry identifiers are `urn:<namespace>:<token>`. Links and the
//! subtitle are derived from the inbox token, so they are written but not
//! read back. The inbox creation time has no Atom element and travels in a
//! foreign-namespace extension element.

use crate::models::{Entry, FeedDocument, Inbox};
use chrono::{DateTime, SecondsFormat, Utc};
use mailfeed_common::config::Config;
use mailfeed_common::types::FeedLinks;
use mailfeed_common::{Error, Result};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

/// Atom namespace
pub const ATOM_NS: &str = "http://www.w3.org/2005/Atom";

/// Namespace of the extension elements
pub const EXTENSION_NS: &str = "urn:mailfeed:atom-extensions";

const EXTENSION_PREFIX: &str = "mailfeed";

/// Converts feed documents to and from their published Atom form
#[derive(Debug, Clone)]
pub struct AtomCodec {
    links: FeedLinks,
    urn_namespace: String,
    service_name: String,
}

impl AtomCodec {
    pub fn new(
        links: FeedLinks,
        urn_namespace: impl Into<String>,
        service_name: impl Into<String>,
    ) -> Self {
        Self {
            links,
            urn_namespace: urn_namespace.into(),
            service_name: service_name.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            FeedLinks::from_config(&config.server),
            config.feed.urn_namespace.clone(),
            config.feed.service_name.clone(),
        )
    }

    pub fn links(&self) -> &FeedLinks {
        &self.links
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// `urn:<namespace>:<token>`
    pub fn urn(&self, token: &str) -> String {
        format!("urn:{}:{}", self.urn_namespace, token)
    }

    fn token_from_urn<'a>(&self, urn: &'a str) -> Result<&'a str> {
        urn.strip_prefix("urn:")
            .and_then(|rest| rest.strip_prefix(self.urn_namespace.as_str()))
            .and_then(|rest| rest.strip_prefix(':'))
            .filter(|token| !token.is_empty())
            .ok_or_else(|| Error::Feed(format!("Unexpected identifier: {}", urn)))
    }

    /// Size in bytes of the serialized document
    pub fn serialized_len(&self, doc: &FeedDocument) -> Result<usize> {
        Ok(self.serialize(doc)?.len())
    }

    /// Bytes one entry contributes to the serialized document. Entries are
    /// written back to back, so removing an entry shrinks the document by
    /// exactly this much.
    pub fn entry_len(&self, entry: &Entry) -> Result<usize> {
        let mut writer = Writer::new(Vec::new());
        self.write_entry(&mut writer, entry)
            .map_err(|e| Error::Feed(format!("Failed to write entry: {}", e)))?;
        Ok(writer.into_inner().len())
    }

    /// Render a feed document as Atom XML
    pub fn serialize(&self, doc: &FeedDocument) -> Result<String> {
        let mut writer = Writer::new(Vec::new());
        self.write_feed(&mut writer, doc)
            .map_err(|e| Error::Feed(format!("Failed to write feed: {}", e)))?;

        String::from_utf8(writer.into_inner())
            .map_err(|e| Error::Feed(format!("Feed is not valid UTF-8: {}", e)))
    }

    fn write_feed(
        &self,
        writer: &mut Writer<Vec<u8>>,
        doc: &FeedDocument,
    ) -> std::result::Result<(), quick_xml::Error> {
        let token = doc.token();
        let feed_url = self.links.feed_url(token);
        let subtitle = format!(
            "{} inbox “{}”",
            self.service_name,
            self.links.address(token)
        );
        let ext_xmlns = format!("xmlns:{}", EXTENSION_PREFIX);
        let ext_created = format!("{}:created", EXTENSION_PREFIX);

        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        writer.write_event(Event::Start(
            BytesStart::new("feed")
                .with_attributes([("xmlns", ATOM_NS), (ext_xmlns.as_str(), EXTENSION_NS)]),
        ))?;
        writer.write_event(Event::Empty(BytesStart::new("link").with_attributes([
            ("rel", "self"),
            ("type", "application/atom+xml"),
            ("href", feed_url.as_str()),
        ])))?;
        writer.write_event(Event::Empty(BytesStart::new("link").with_attributes([
            ("rel", "alternate"),
            ("type", "text/html"),
            ("href", self.links.home_url()),
        ])))?;
        write_text_element(writer, "id", &self.urn(token))?;
        write_text_element(writer, "title", &doc.inbox.name)?;
        write_text_element(writer, "subtitle", &subtitle)?;
        write_text_element(writer, "updated", &format_timestamp(&doc.inbox.updated_at))?;
        write_text_element(writer, &ext_created, &format_timestamp(&doc.inbox.created_at))?;

        for entry in &doc.entries {
            self.write_entry(writer, entry)?;
        }

        writer.write_event(Event::End(BytesEnd::new("feed")))?;
        Ok(())
    }

    fn write_entry(
        &self,
        writer: &mut Writer<Vec<u8>>,
        entry: &Entry,
    ) -> std::result::Result<(), quick_xml::Error> {
        writer.write_event(Event::Start(BytesStart::new("entry")))?;
        write_text_element(writer, "id", &self.urn(&entry.token))?;
        write_text_element(writer, "title", &entry.title)?;
        writer.write_event(Event::Start(BytesStart::new("author")))?;
        write_text_element(writer, "name", &entry.author)?;
        writer.write_event(Event::End(BytesEnd::new("author")))?;
        write_text_element(writer, "updated", &format_timestamp(&entry.created_at))?;
        writer.write_event(Event::Start(
            BytesStart::new("content").with_attributes([("type", "html")]),
        ))?;
        writer.write_event(Event::Text(BytesText::new(&entry.content)))?;
        writer.write_event(Event::End(BytesEnd::new("content")))?;
        writer.write_event(Event::End(BytesEnd::new("entry")))?;
        Ok(())
    }

    /// Parse an Atom document previously produced by [`AtomCodec::serialize`]
    pub fn parse(&self, xml: &str) -> Result<FeedDocument> {
        let mut reader = Reader::from_str(xml);
        let mut path: Vec<String> = Vec::new();
        let mut text = String::new();
        let mut feed = PartialFeed::default();
        let mut entry: Option<PartialEntry> = None;

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    let name = element_name(&e);
                    if name == "entry" && path.len() == 1 {
                        entry = Some(PartialEntry::default());
                    }
                    path.push(name);
                    text.clear();
                }
                Ok(Event::Empty(e)) => {
                    path.push(element_name(&e));
                    self.leaf(&path, String::new(), &mut feed, entry.as_mut())?;
                    path.pop();
                }
                Ok(Event::Text(e)) => {
                    let unescaped = e
                        .unescape()
                        .map_err(|e| Error::Feed(format!("Invalid text: {}", e)))?;
                    text.push_str(&unescaped);
                }
                Ok(Event::CData(e)) => {
                    let raw = e.into_inner();
                    let s = std::str::from_utf8(&raw)
                        .map_err(|e| Error::Feed(format!("Invalid CDATA: {}", e)))?;
                    text.push_str(s);
                }
                Ok(Event::End(_)) => {
                    if path.len() == 2 && path[1] == "entry" {
                        if let Some(done) = entry.take() {
                            feed.entries.push(done);
                        }
                    } else {
                        self.leaf(&path, std::mem::take(&mut text), &mut feed, entry.as_mut())?;
                    }
                    path.pop();
                    text.clear();
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(Error::Feed(format!(
                        "Error parsing feed at position {}: {}",
                        reader.buffer_position(),
                        e
                    )));
                }
                _ => {}
            }
        }

        self.finish(feed)
    }

    fn leaf(
        &self,
        path: &[String],
        text: String,
        feed: &mut PartialFeed,
        entry: Option<&mut PartialEntry>,
    ) -> Result<()> {
        let path: Vec<&str> = path.iter().map(String::as_str).collect();
        match (path.as_slice(), entry) {
            (["feed", "id"], _) => feed.id = Some(text),
            (["feed", "title"], _) => feed.title = Some(text),
            (["feed", "updated"], _) => feed.updated = Some(parse_timestamp(&text)?),
            (["feed", "created"], _) => feed.created = Some(parse_timestamp(&text)?),
            (["feed", "entry", "id"], Some(entry)) => entry.id = Some(text),
            (["feed", "entry", "title"], Some(entry)) => entry.title = text,
            (["feed", "entry", "author", "name"], Some(entry)) => entry.author = text,
            (["feed", "entry", "updated"], Some(entry)) => {
                entry.updated = Some(parse_timestamp(&text)?)
            }
            (["feed", "entry", "content"], Some(entry)) => entry.content = text,
            _ => {}
        }
        Ok(())
    }

    fn finish(&self, feed: PartialFeed) -> Result<FeedDocument> {
        let id = feed
            .id
            .ok_or_else(|| Error::Feed("Feed has no id".to_string()))?;
        let token = self.token_from_urn(&id)?.to_string();
        let updated_at = feed
            .updated
            .ok_or_else(|| Error::Feed("Feed has no updated timestamp".to_string()))?;

        let mut entries = Vec::with_capacity(feed.entries.len());
        for partial in feed.entries {
            let id = partial
                .id
                .ok_or_else(|| Error::Feed("Entry has no id".to_string()))?;
            entries.push(Entry {
                token: self.token_from_urn(&id)?.to_string(),
                inbox: token.clone(),
                title: partial.title,
                author: partial.author,
                content: partial.content,
                created_at: partial.updated.unwrap_or(updated_at),
            });
        }

        Ok(FeedDocument {
            inbox: Inbox {
                token,
                name: feed.title.unwrap_or_default(),
                created_at: feed.created.unwrap_or(updated_at),
                updated_at,
            },
            entries,
        })
    }
}

#[derive(Default)]
struct PartialFeed {
    id: Option<String>,
    title: Option<String>,
    updated: Option<DateTime<Utc>>,
    created: Option<DateTime<Utc>>,
    entries: Vec<PartialEntry>,
}

#[derive(Default)]
struct PartialEntry {
    id: Option<String>,
    title: String,
    author: String,
    updated: Option<DateTime<Utc>>,
    content: String,
}

fn element_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn write_text_element(
    writer: &mut Writer<Vec<u8>>,
    name: &str,
    text: &str,
) -> std::result::Result<(), quick_xml::Error> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s.trim())
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Feed(format!("Invalid timestamp {:?}: {}", s, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{now, EntryContent};
    use pretty_assertions::assert_eq;

    fn codec() -> AtomCodec {
        AtomCodec::new(
            FeedLinks::new("feeds.example.com", "https://feeds.example.com/"),
            "mailfeed",
            "mailfeed",
        )
    }

    fn sample_feed() -> FeedDocument {
        let created = now() - chrono::Duration::days(3);
        let mut inbox = Inbox::new("inboxtoken1234567890", "Weekly <Digest> & News", created);
        inbox.updated_at = now();

        let first = EntryContent {
            title: "Hi \"there\"".to_string(),
            author: "Jane Doe <jane@example.com>".to_string(),
            content: "<p>hello &amp; <b>welcome</b></p>\n".to_string(),
        }
        .into_entry("entrytokenaaaaaaaaaa", &inbox, inbox.updated_at);
        let second = EntryContent {
            title: String::new(),
            author: "a@b.com".to_string(),
            content: "  leading and trailing space  ".to_string(),
        }
        .into_entry("entrytokenbbbbbbbbbb", &inbox, created);

        FeedDocument {
            inbox,
            entries: vec![first, second],
        }
    }

    #[test]
    fn test_round_trip() {
        let codec = codec();
        let doc = sample_feed();

        let xml = codec.serialize(&doc).unwrap();
        let parsed = codec.parse(&xml).unwrap();

        assert_eq!(parsed, doc);
    }

    #[test]
    fn test_round_trip_empty_feed() {
        let codec = codec();
        let doc = FeedDocument::empty(Inbox::new("emptytoken", "", now()));

        let parsed = codec.parse(&codec.serialize(&doc).unwrap()).unwrap();
        assert_eq!(parsed, doc);
    }

    #[test]
    fn test_serialized_structure() {
        let codec = codec();
        let xml = codec.serialize(&sample_feed()).unwrap();

        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.contains("<feed xmlns=\"http://www.w3.org/2005/Atom\""));
        assert!(xml.contains(
            "<link rel=\"self\" type=\"application/atom+xml\" href=\"https://feeds.example.com/feeds/inboxtoken1234567890.xml\"/>"
        ));
        assert!(xml.contains(
            "<link rel=\"alternate\" type=\"text/html\" href=\"https://feeds.example.com/\"/>"
        ));
        assert!(xml.contains("<id>urn:mailfeed:inboxtoken1234567890</id>"));
        assert!(xml.contains("inbox “inboxtoken1234567890@feeds.example.com”</subtitle>"));
        assert!(xml.contains("<title>Weekly &lt;Digest&gt; &amp; News</title>"));
        assert!(xml.contains("<content type=\"html\">&lt;p&gt;hello"));
        assert!(xml.contains("<author><name>Jane Doe &lt;jane@example.com&gt;</name></author>"));
        assert_eq!(xml.matches("<entry>").count(), 2);
        assert_eq!(codec.serialized_len(&sample_feed()).unwrap(), xml.len());
    }

    #[test]
    fn test_entry_len_adds_up() {
        let codec = codec();
        let doc = sample_feed();
        let mut without = doc.clone();
        let removed = without.entries.pop().unwrap();

        assert_eq!(
            codec.serialized_len(&doc).unwrap(),
            codec.serialized_len(&without).unwrap() + codec.entry_len(&removed).unwrap()
        );
    }

    #[test]
    fn test_parse_rejects_foreign_identifiers() {
        let codec = codec();
        let xml = codec
            .serialize(&sample_feed())
            .unwrap()
            .replace("urn:mailfeed:inboxtoken", "urn:other:inboxtoken");

        assert!(matches!(codec.parse(&xml), Err(Error::Feed(_))));
    }

    #[test]
    fn test_parse_rejects_malformed_xml() {
        let codec = codec();
        assert!(codec.parse("<feed><id>urn:mailfeed:x</feed>").is_err());
        assert!(codec.parse("<feed></feed>").is_err());
    }
}
