//! MIME message decoding into entry content

use mail_parser::{Addr, MessageParser};
use mailfeed_storage::EntryContent;

/// Turns raw message bytes into the fields an entry needs
pub trait MessageDecoder: Send + Sync {
    /// `None` when the bytes are not a usable message
    fn decode(&self, data: &[u8]) -> Option<EntryContent>;
}

/// Decoder backed by `mail-parser`
#[derive(Debug, Default, Clone)]
pub struct MimeDecoder;

impl MessageDecoder for MimeDecoder {
    fn decode(&self, data: &[u8]) -> Option<EntryContent> {
        let message = MessageParser::default().parse(data)?;

        let title = message.subject().unwrap_or_default();
        let author = message
            .from()
            .and_then(|from| from.first())
            .map(format_author)
            .unwrap_or_default();
        // Plain-text messages come back converted to HTML
        let content = message.body_html(0).unwrap_or_default();

        Some(EntryContent {
            title: xml_safe(title),
            author: xml_safe(&author),
            content: xml_safe(&content),
        })
    }
}

fn format_author(addr: &Addr<'_>) -> String {
    match (addr.name(), addr.address()) {
        (Some(name), Some(address)) if !name.is_empty() => format!("{} <{}>", name, address),
        (_, Some(address)) => address.to_string(),
        (Some(name), None) => name.to_string(),
        (None, None) => String::new(),
    }
}

/// Drop characters XML 1.0 cannot carry, even escaped
pub fn xml_safe(text: &str) -> String {
    text.chars()
        .filter(|&c| {
            matches!(c, '\t' | '\n' | '\r')
                || (c >= '\u{20}' && c != '\u{FFFE}' && c != '\u{FFFF}')
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_decode_html_message() {
        let raw = concat!(
            "From: Weekly Digest <digest@news.example>\r\n",
            "To: abc@feeds.example.com\r\n",
            "Subject: Issue 42\r\n",
            "MIME-Version: 1.0\r\n",
            "Content-Type: text/html; charset=utf-8\r\n",
            "\r\n",
            "<p>Hello <b>world</b></p>\r\n",
        );

        let content = MimeDecoder.decode(raw.as_bytes()).unwrap();
        assert_eq!(content.title, "Issue 42");
        assert_eq!(content.author, "Weekly Digest <digest@news.example>");
        assert!(content.content.contains("<p>Hello <b>world</b></p>"));
    }

    #[test]
    fn test_decode_plain_text_message() {
        let raw = concat!(
            "From: digest@news.example\r\n",
            "Subject: Plain\r\n",
            "\r\n",
            "Hello & goodbye\r\n",
        );

        let content = MimeDecoder.decode(raw.as_bytes()).unwrap();
        assert_eq!(content.title, "Plain");
        assert_eq!(content.author, "digest@news.example");
        assert!(content.content.contains("Hello &amp; goodbye"));
    }

    #[test]
    fn test_decode_missing_headers() {
        let raw = "X-Mailer: test\r\n\r\nbody\r\n";

        let content = MimeDecoder.decode(raw.as_bytes()).unwrap();
        assert_eq!(content.title, "");
        assert_eq!(content.author, "");
    }

    #[test]
    fn test_xml_safe() {
        assert_eq!(xml_safe("a\u{0}b\u{8}c\td\ne\u{FFFF}"), "abc\td\ne");
        assert_eq!(xml_safe("ünïcødé “quotes”"), "ünïcødé “quotes”");
    }
}
