//! SMTP session handler

use crate::delivery::Disposition;
use crate::service::FeedService;
use anyhow::Result;
use mailfeed_common::config::SmtpConfig;
use mailfeed_common::types::Envelope;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter,
};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Longest accepted command line, CRLF included
const MAX_COMMAND_LINE: u64 = 4096;

/// SMTP session state
#[derive(Debug, Clone, PartialEq)]
enum SessionState {
    Connected,
    Greeted,
    MailFrom,
    RcptTo,
}

/// Result of reading a DATA section
#[derive(Debug, PartialEq)]
enum MessageData {
    Complete(Vec<u8>),
    TooLarge,
}

/// SMTP session handler
pub struct SmtpHandler {
    config: SmtpConfig,
    hostname: String,
    service: Arc<FeedService>,
    peer_addr: SocketAddr,
}

impl SmtpHandler {
    /// Create a new handler
    pub fn new(
        config: SmtpConfig,
        hostname: impl Into<String>,
        service: Arc<FeedService>,
        peer_addr: SocketAddr,
    ) -> Self {
        Self {
            config,
            hostname: hostname.into(),
            service,
            peer_addr,
        }
    }

    /// Handle an SMTP session on a TCP connection
    pub async fn handle(self, stream: TcpStream) -> Result<()> {
        let (reader, writer) = stream.into_split();
        self.run(BufReader::new(reader), BufWriter::new(writer))
            .await
    }

    /// Run the SMTP dialogue over any byte stream
    pub async fn run<R, W>(&self, mut reader: R, mut writer: BufWriter<W>) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut state = SessionState::Connected;
        let mut envelope = Envelope::default();

        self.send_response(&mut writer, 220, &format!("{} ESMTP mailfeed", self.hostname))
            .await?;

        let mut buf = Vec::new();

        loop {
            let Some(bytes_read) = self
                .read_line(&mut reader, &mut buf, MAX_COMMAND_LINE)
                .await?
            else {
                self.send_response(&mut writer, 421, "4.4.2 Idle timeout, closing connection")
                    .await?;
                break;
            };

            if bytes_read == 0 {
                debug!("Client {} disconnected", self.peer_addr);
                break;
            }

            if !buf.ends_with(b"\n") && bytes_read as u64 == MAX_COMMAND_LINE {
                self.send_response(&mut writer, 500, "5.5.2 Line too long")
                    .await?;
                break;
            }

            let line = String::from_utf8_lossy(&buf);
            let line = line.trim();
            debug!("SMTP from {}: {}", self.peer_addr, line);

            let (command, args) = parse_command(line);

            match command.to_uppercase().as_str() {
                "HELO" => {
                    envelope.helo = Some(args.to_string());
                    envelope.from = None;
                    envelope.recipients.clear();
                    state = SessionState::Greeted;
                    self.send_response(&mut writer, 250, &format!("{} Hello {}", self.hostname, args))
                        .await?;
                }

                "EHLO" => {
                    envelope.helo = Some(args.to_string());
                    envelope.from = None;
                    envelope.recipients.clear();
                    state = SessionState::Greeted;

                    let responses = [
                        format!("{} Hello {}", self.hostname, args),
                        format!("SIZE {}", self.config.max_message_size),
                        "8BITMIME".to_string(),
                        "PIPELINING".to_string(),
                        "ENHANCEDSTATUSCODES".to_string(),
                    ];

                    for (i, resp) in responses.iter().enumerate() {
                        if i == responses.len() - 1 {
                            self.send_response(&mut writer, 250, resp).await?;
                        } else {
                            self.send_response_continue(&mut writer, 250, resp).await?;
                        }
                    }
                }

                "STARTTLS" | "AUTH" => {
                    self.send_response(&mut writer, 502, "5.5.1 Command not implemented")
                        .await?;
                }

                "MAIL" => {
                    if state != SessionState::Greeted {
                        self.send_response(&mut writer, 503, "5.5.1 Bad sequence of commands")
                            .await?;
                        continue;
                    }

                    if let Some(from_addr) = parse_mail_from(args) {
                        envelope.from = from_addr;
                        state = SessionState::MailFrom;
                        self.send_response(&mut writer, 250, "2.1.0 OK").await?;
                    } else {
                        self.send_response(&mut writer, 501, "5.1.7 Bad sender address syntax")
                            .await?;
                    }
                }

                "RCPT" => {
                    if state != SessionState::MailFrom && state != SessionState::RcptTo {
                        self.send_response(&mut writer, 503, "5.5.1 Bad sequence of commands")
                            .await?;
                        continue;
                    }

                    // Which recipients are ours is decided after DATA
                    match parse_rcpt_to(args) {
                        Some(_) if envelope.recipients.len() >= self.config.max_recipients => {
                            self.send_response(&mut writer, 452, "4.5.3 Too many recipients")
                                .await?;
                        }
                        Some(to_addr) => {
                            envelope.recipients.push(to_addr);
                            state = SessionState::RcptTo;
                            self.send_response(&mut writer, 250, "2.1.5 OK").await?;
                        }
                        None => {
                            self.send_response(
                                &mut writer,
                                501,
                                "5.1.3 Bad recipient address syntax",
                            )
                            .await?;
                        }
                    }
                }

                "DATA" => {
                    if state != SessionState::RcptTo || envelope.recipients.is_empty() {
                        self.send_response(&mut writer, 503, "5.5.1 Bad sequence of commands")
                            .await?;
                        continue;
                    }

                    self.send_response(&mut writer, 354, "Start mail input; end with <CRLF>.<CRLF>")
                        .await?;

                    match self.read_data(&mut reader).await? {
                        MessageData::Complete(data) => {
                            let report = self.service.deliver(&envelope.recipients, &data).await;
                            match report.disposition {
                                Disposition::Accepted => {
                                    info!(
                                        peer = %self.peer_addr,
                                        helo = envelope.helo.as_deref().unwrap_or("-"),
                                        from = envelope.from.as_deref().unwrap_or("<>"),
                                        recipients = envelope.recipients.len(),
                                        delivered = report.delivered(),
                                        size = data.len(),
                                        "Message accepted"
                                    );
                                    self.send_response(
                                        &mut writer,
                                        250,
                                        &format!(
                                            "2.0.0 OK: delivered to {} inbox(es)",
                                            report.delivered()
                                        ),
                                    )
                                    .await?;
                                }
                                Disposition::TransientFailure(reason) => {
                                    warn!(
                                        peer = %self.peer_addr,
                                        helo = envelope.helo.as_deref().unwrap_or("-"),
                                        reason = %reason,
                                        "Message deferred"
                                    );
                                    self.send_response(
                                        &mut writer,
                                        451,
                                        &format!("4.3.0 Temporary failure: {}", reason),
                                    )
                                    .await?;
                                }
                            }
                        }
                        MessageData::TooLarge => {
                            warn!(peer = %self.peer_addr, "Message exceeds size limit");
                            self.send_response(&mut writer, 552, "5.3.4 Message too big")
                                .await?;
                        }
                    }

                    state = SessionState::Greeted;
                    envelope.from = None;
                    envelope.recipients.clear();
                }

                "RSET" => {
                    envelope.from = None;
                    envelope.recipients.clear();
                    if state != SessionState::Connected {
                        state = SessionState::Greeted;
                    }
                    self.send_response(&mut writer, 250, "2.0.0 OK").await?;
                }

                "NOOP" => {
                    self.send_response(&mut writer, 250, "2.0.0 OK").await?;
                }

                "QUIT" => {
                    self.send_response(&mut writer, 221, "2.0.0 Bye").await?;
                    break;
                }

                "VRFY" => {
                    self.send_response(&mut writer, 252, "2.5.2 Cannot VRFY user")
                        .await?;
                }

                "EXPN" => {
                    self.send_response(&mut writer, 502, "5.5.1 EXPN not supported")
                        .await?;
                }

                _ => {
                    self.send_response(&mut writer, 500, "5.5.2 Command not recognized")
                        .await?;
                }
            }
        }

        Ok(())
    }

    /// Read one line of at most `limit` bytes. `None` on idle timeout.
    async fn read_line<R: AsyncBufRead + Unpin>(
        &self,
        reader: &mut R,
        buf: &mut Vec<u8>,
        limit: u64,
    ) -> Result<Option<usize>> {
        buf.clear();
        let timeout = Duration::from_secs(self.config.connection_timeout_secs);
        match tokio::time::timeout(timeout, (&mut *reader).take(limit).read_until(b'\n', buf)).await
        {
            Ok(read) => Ok(Some(read?)),
            Err(_) => Ok(None),
        }
    }

    /// Read message data until <CRLF>.<CRLF>. An oversized message is read
    /// to its end and discarded.
    async fn read_data<R: AsyncBufRead + Unpin>(&self, reader: &mut R) -> Result<MessageData> {
        let max_size = self.config.max_message_size;
        let line_limit = max_size as u64 + 3;
        let mut data = Vec::new();
        let mut line = Vec::new();
        let mut too_large = false;
        // Over-long lines arrive in pieces; only a piece starting a line
        // can be the terminator or carry a stuffed dot
        let mut at_line_start = true;

        loop {
            let bytes_read = self
                .read_line(reader, &mut line, line_limit)
                .await?
                .ok_or_else(|| anyhow::anyhow!("Timed out during DATA"))?;

            if bytes_read == 0 {
                return Err(anyhow::anyhow!("Connection closed during DATA"));
            }

            let starts_line = at_line_start;
            at_line_start = line.ends_with(b"\n");

            if starts_line && trim_line_ending(&line) == b"." {
                break;
            }

            if too_large {
                continue;
            }

            let line_bytes = if starts_line {
                line.strip_prefix(b".").unwrap_or(&line)
            } else {
                &line
            };
            data.extend_from_slice(line_bytes);

            if data.len() > max_size {
                too_large = true;
                data = Vec::new();
            }
        }

        if too_large {
            Ok(MessageData::TooLarge)
        } else {
            Ok(MessageData::Complete(data))
        }
    }

    /// Send an SMTP response
    async fn send_response<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut BufWriter<W>,
        code: u16,
        message: &str,
    ) -> Result<()> {
        let response = format!("{} {}\r\n", code, message);
        writer.write_all(response.as_bytes()).await?;
        writer.flush().await?;
        debug!("SMTP to {}: {}", self.peer_addr, response.trim());
        Ok(())
    }

    /// Send a multi-line response (intermediate line)
    async fn send_response_continue<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut BufWriter<W>,
        code: u16,
        message: &str,
    ) -> Result<()> {
        let response = format!("{}-{}\r\n", code, message);
        writer.write_all(response.as_bytes()).await?;
        debug!("SMTP to {}: {}", self.peer_addr, response.trim());
        Ok(())
    }
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Parse an SMTP command line into command and arguments
fn parse_command(line: &str) -> (&str, &str) {
    match line.split_once(' ') {
        Some((command, args)) => (command, args.trim()),
        None => (line, ""),
    }
}

/// Extract the path from `<path> [params]` or a bare `path [params]`
fn parse_path(addr_part: &str) -> Option<&str> {
    let addr_part = addr_part.trim();
    if let Some(rest) = addr_part.strip_prefix('<') {
        let end = rest.find('>')?;
        Some(&rest[..end])
    } else {
        addr_part.split_whitespace().next()
    }
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &s[prefix.len()..])
}

/// Parse `FROM:<address>`. `Some(None)` is the null sender.
fn parse_mail_from(args: &str) -> Option<Option<String>> {
    let addr_part = strip_prefix_ignore_case(args.trim(), "FROM:")?;
    let email = parse_path(addr_part)?;
    if email.is_empty() {
        Some(None)
    } else {
        Some(Some(email.to_string()))
    }
}

/// Parse `TO:<address>`, keeping the address as given
fn parse_rcpt_to(args: &str) -> Option<String> {
    let addr_part = strip_prefix_ignore_case(args.trim(), "TO:")?;
    parse_path(addr_part)
        .filter(|email| !email.is_empty())
        .map(str::to_string)
}
