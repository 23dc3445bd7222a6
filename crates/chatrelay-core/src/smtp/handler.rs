//! SMTP session handler

use crate::filter::{BeforeQueueFilter, SmtpReply};
use anyhow::Result;
use chatrelay_common::Envelope;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
    BufWriter,
};
use tracing::{debug, info, warn};

/// Longest command line accepted, including CRLF
const MAX_COMMAND_LINE: usize = 4096;

/// Largest piece of a DATA line read at once
const MAX_DATA_CHUNK: usize = 8192;

/// Per-session limits
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Name announced in the greeting
    pub hostname: String,
    pub max_message_size: usize,
    /// Idle time after which the session is dropped
    pub idle_timeout: Duration,
}

/// SMTP session state
#[derive(Debug, Clone, Copy, PartialEq)]
enum SessionState {
    Connected,
    Greeted,
    MailFrom,
    RcptTo,
}

/// Outcome of reading the DATA section
enum DataOutcome {
    Complete(Vec<u8>),
    TooLarge,
}

/// SMTP session handler
pub struct SmtpHandler {
    settings: SessionSettings,
    filter: Arc<dyn BeforeQueueFilter>,
    peer: String,
}

impl SmtpHandler {
    /// Create a new handler
    pub fn new(settings: SessionSettings, filter: Arc<dyn BeforeQueueFilter>, peer: impl fmt::Display) -> Self {
        Self {
            settings,
            filter,
            peer: peer.to_string(),
        }
    }

    /// Handle an SMTP session until QUIT, disconnect or idle timeout
    pub async fn handle<S>(self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (reader, writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(reader);
        let mut writer = BufWriter::new(writer);

        let mut state = SessionState::Connected;
        let mut envelope = Envelope::default();

        // Send greeting
        self.send_response(&mut writer, 220, &format!("{} ESMTP", self.settings.hostname))
            .await?;

        let mut buf = Vec::new();

        loop {
            buf.clear();
            let read = tokio::time::timeout(
                self.settings.idle_timeout,
                (&mut reader).take(MAX_COMMAND_LINE as u64).read_until(b'\n', &mut buf),
            )
            .await;

            let bytes_read = match read {
                Ok(result) => result?,
                Err(_) => {
                    debug!("Client {} idle, closing", self.peer);
                    self.send_response(&mut writer, 421, "4.4.2 Idle timeout, closing connection")
                        .await?;
                    break;
                }
            };

            if bytes_read == 0 {
                debug!("Client {} disconnected", self.peer);
                break;
            }

            if !buf.ends_with(b"\n") {
                self.send_response(&mut writer, 500, "5.5.2 Line too long").await?;
                break;
            }

            let line = String::from_utf8_lossy(&buf);
            let line = line.trim();
            debug!("SMTP from {}: {}", self.peer, line);

            let (command, args) = parse_command(line);

            match command.to_uppercase().as_str() {
                "HELO" => {
                    state = SessionState::Greeted;
                    envelope.reset();
                    self.send_response(&mut writer, 250, &format!("{} Hello {}", self.settings.hostname, args))
                        .await?;
                }

                "EHLO" => {
                    state = SessionState::Greeted;
                    envelope.reset();

                    let responses = [
                        format!("{} Hello {}", self.settings.hostname, args),
                        format!("SIZE {}", self.settings.max_message_size),
                        "8BITMIME".to_string(),
                        "PIPELINING".to_string(),
                    ];

                    for (i, resp) in responses.iter().enumerate() {
                        if i == responses.len() - 1 {
                            self.send_response(&mut writer, 250, resp).await?;
                        } else {
                            self.send_response_continue(&mut writer, 250, resp).await?;
                        }
                    }
                }

                "MAIL" => {
                    if state != SessionState::Greeted {
                        self.send_response(&mut writer, 503, "5.5.1 Bad sequence of commands")
                            .await?;
                        continue;
                    }

                    let Some(from_addr) = parse_mail_from(args) else {
                        self.send_response(&mut writer, 501, "5.1.7 Bad sender address syntax")
                            .await?;
                        continue;
                    };

                    match self.filter.check_mail(&from_addr) {
                        Ok(()) => {
                            envelope.mail_from = from_addr;
                            state = SessionState::MailFrom;
                            self.send_response(&mut writer, 250, "2.1.0 OK").await?;
                        }
                        Err(reply) => self.send_reply(&mut writer, &reply).await?,
                    }
                }

                "RCPT" => {
                    if state != SessionState::MailFrom && state != SessionState::RcptTo {
                        self.send_response(&mut writer, 503, "5.5.1 Bad sequence of commands")
                            .await?;
                        continue;
                    }

                    if let Some(to_addr) = parse_rcpt_to(args) {
                        envelope.rcpt_to.push(to_addr);
                        state = SessionState::RcptTo;
                        self.send_response(&mut writer, 250, "2.1.5 OK").await?;
                    } else {
                        self.send_response(&mut writer, 501, "5.1.3 Bad recipient address syntax")
                            .await?;
                    }
                }

                "DATA" => {
                    if state != SessionState::RcptTo {
                        self.send_response(&mut writer, 503, "5.5.1 Bad sequence of commands")
                            .await?;
                        continue;
                    }

                    self.send_response(&mut writer, 354, "End data with <CR><LF>.<CR><LF>")
                        .await?;

                    match self.read_data(&mut reader).await? {
                        DataOutcome::Complete(data) => {
                            envelope.data = data;
                            let reply = self.process_transaction(&envelope).await;
                            self.send_reply(&mut writer, &reply).await?;
                        }
                        DataOutcome::TooLarge => {
                            warn!("Message from {} exceeds {} bytes", self.peer, self.settings.max_message_size);
                            self.send_response(&mut writer, 552, "5.3.4 Message size exceeds fixed limit")
                                .await?;
                        }
                    }

                    // Reset state for next message
                    state = SessionState::Greeted;
                    envelope.reset();
                }

                "RSET" => {
                    envelope.reset();
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

                _ => {
                    self.send_response(&mut writer, 500, "5.5.2 Command not recognized")
                        .await?;
                }
            }
        }

        Ok(())
    }

    /// Run the filter on a complete transaction and re-inject it if accepted
    async fn process_transaction(&self, envelope: &Envelope) -> SmtpReply {
        if let Err(reply) = self.filter.check_data(envelope) {
            info!(
                filter = self.filter.name(),
                sender = %envelope.mail_from,
                code = reply.code,
                "Rejected message from {}", self.peer
            );
            return reply;
        }

        match self.filter.reinject(envelope).await {
            Ok(()) => {
                info!(
                    filter = self.filter.name(),
                    sender = %envelope.mail_from,
                    recipients = envelope.rcpt_to.len(),
                    size = envelope.data.len(),
                    "Accepted message from {}", self.peer
                );
                SmtpReply::new(250, "2.0.0 OK")
            }
            Err(reply) => reply,
        }
    }

    /// Read message data until <CRLF>.<CRLF>, removing dot-stuffing
    async fn read_data<R: AsyncBufRead + Unpin>(&self, reader: &mut R) -> Result<DataOutcome> {
        let mut data = Vec::new();
        let mut line = Vec::new();
        let mut too_large = false;
        let mut at_line_start = true;

        loop {
            line.clear();
            let bytes_read = tokio::time::timeout(
                self.settings.idle_timeout,
                (&mut *reader).take(MAX_DATA_CHUNK as u64).read_until(b'\n', &mut line),
            )
            .await
            .map_err(|_| anyhow::anyhow!("Idle timeout during DATA"))??;

            if bytes_read == 0 {
                return Err(anyhow::anyhow!("Connection closed during DATA"));
            }

            // long lines arrive in several chunks
            let starts_line = at_line_start;
            at_line_start = line.last() == Some(&b'\n');

            // Check for end of data
            if starts_line && (line == b".\r\n" || line == b".\n") {
                break;
            }

            if too_large {
                continue;
            }

            let line_bytes = if starts_line && line.first() == Some(&b'.') {
                &line[1..]
            } else {
                &line[..]
            };

            if data.len() + line_bytes.len() > self.settings.max_message_size {
                too_large = true;
                data = Vec::new();
                continue;
            }
            data.extend_from_slice(line_bytes);
        }

        Ok(if too_large {
            DataOutcome::TooLarge
        } else {
            DataOutcome::Complete(data)
        })
    }

    async fn send_reply<W: AsyncWrite + Unpin>(&self, writer: &mut BufWriter<W>, reply: &SmtpReply) -> Result<()> {
        self.send_response(writer, reply.code, &reply.message).await
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
        debug!("SMTP to {}: {}", self.peer, response.trim());
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
        debug!("SMTP to {}: {}", self.peer, response.trim());
        Ok(())
    }
}

/// Parse an SMTP command line into command and arguments
fn parse_command(line: &str) -> (&str, &str) {
    match line.split_once(' ') {
        Some((command, args)) => (command, args.trim()),
        None => (line, ""),
    }
}

/// Extract the path after `prefix` (`FROM:` / `TO:`), ignoring any
/// parameters that follow it
fn parse_path<'a>(args: &'a str, prefix: &str) -> Option<&'a str> {
    let head = args.get(..prefix.len())?;
    if !head.eq_ignore_ascii_case(prefix) {
        return None;
    }
    let addr_part = args[prefix.len()..].trim_start();

    if let Some(rest) = addr_part.strip_prefix('<') {
        let end = rest.find('>')?;
        Some(rest[..end].trim())
    } else {
        addr_part.split_whitespace().next()
    }
}

/// Parse MAIL FROM:<address>; the null sender yields an empty string
fn parse_mail_from(args: &str) -> Option<String> {
    parse_path(args, "FROM:").map(str::to_string)
}

/// Parse RCPT TO:<address> [ORCPT=...]
fn parse_rcpt_to(args: &str) -> Option<String> {
    parse_path(args, "TO:")
        .filter(|addr| !addr.is_empty() && !addr.contains(char::is_whitespace))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;
    use tokio::io::duplex;

    /// Accepts everything except senders containing "blocked" and bodies
    /// containing "REJECT", recording what it re-injects
    #[derive(Default)]
    struct RecordingFilter {
        reinjected: Mutex<Vec<Envelope>>,
    }

    #[async_trait]
    impl BeforeQueueFilter for RecordingFilter {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn check_mail(&self, mail_from: &str) -> Result<(), SmtpReply> {
            if mail_from.contains("blocked") {
                return Err(SmtpReply::new(450, "4.7.1: Too much mail"));
            }
            Ok(())
        }

        fn check_data(&self, envelope: &Envelope) -> Result<(), SmtpReply> {
            if envelope.data.windows(6).any(|w| w == b"REJECT") {
                return Err(SmtpReply::encryption_needed());
            }
            Ok(())
        }

        async fn reinject(&self, envelope: &Envelope) -> Result<(), SmtpReply> {
            self.reinjected.lock().unwrap().push(envelope.clone());
            Ok(())
        }
    }

    fn settings() -> SessionSettings {
        SessionSettings {
            hostname: "chatmail.example.org".to_string(),
            max_message_size: 1024,
            idle_timeout: Duration::from_secs(5),
        }
    }

    /// Feed `input` to a session and return everything it answered
    async fn converse(filter: Arc<RecordingFilter>, settings: SessionSettings, input: &[u8]) -> String {
        let (client, server) = duplex(64 * 1024);
        let handler = SmtpHandler::new(settings, filter, "test");
        let session = tokio::spawn(handler.handle(server));

        let (mut rx, mut tx) = tokio::io::split(client);
        tx.write_all(input).await.unwrap();

        let mut output = String::new();
        rx.read_to_string(&mut output).await.unwrap();
        session.await.unwrap().unwrap();
        output
    }

    fn codes(output: &str) -> Vec<&str> {
        output
            .lines()
            .filter(|line| line.len() >= 4 && &line[3..4] == " ")
            .map(|line| &line[..3])
            .collect()
    }

    #[tokio::test]
    async fn test_full_transaction() {
        let filter = Arc::new(RecordingFilter::default());
        let output = converse(
            filter.clone(),
            settings(),
            b"EHLO client.example.org\r\n\
              MAIL FROM:<a@example.org> SIZE=100 BODY=8BITMIME\r\n\
              RCPT TO:<b@example.org> ORCPT=rfc822;b@example.org\r\n\
              RCPT TO:<c@example.org>\r\n\
              DATA\r\n\
              Subject: hi\r\n\
              \r\n\
              ..leading dot\r\n\
              line with trailing space \r\n\
              .\r\n\
              QUIT\r\n",
        )
        .await;

        assert!(output.starts_with("220 chatmail.example.org ESMTP\r\n"));
        assert!(output.contains("250-SIZE 1024\r\n"));
        assert!(output.contains("250 PIPELINING\r\n"));
        assert_eq!(codes(&output), vec!["220", "250", "250", "250", "250", "354", "250", "221"]);

        let reinjected = filter.reinjected.lock().unwrap();
        assert_eq!(reinjected.len(), 1);
        assert_eq!(reinjected[0].mail_from, "a@example.org");
        assert_eq!(reinjected[0].rcpt_to, vec!["b@example.org", "c@example.org"]);
        assert_eq!(
            reinjected[0].data,
            b"Subject: hi\r\n\r\n.leading dot\r\nline with trailing space \r\n".to_vec()
        );
    }

    #[tokio::test]
    async fn test_filter_rejections() {
        let filter = Arc::new(RecordingFilter::default());
        let output = converse(
            filter.clone(),
            settings(),
            b"HELO client\r\n\
              MAIL FROM:<blocked@example.org>\r\n\
              MAIL FROM:<a@example.org>\r\n\
              RCPT TO:<b@example.org>\r\n\
              DATA\r\n\
              REJECT me\r\n\
              .\r\n\
              QUIT\r\n",
        )
        .await;

        assert_eq!(codes(&output), vec!["220", "250", "450", "250", "250", "354", "523", "221"]);
        assert!(output.contains("523 Encryption Needed: Invalid Unencrypted Mail\r\n"));
        assert!(filter.reinjected.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bad_sequence_and_syntax() {
        let filter = Arc::new(RecordingFilter::default());
        let output = converse(
            filter,
            settings(),
            b"MAIL FROM:<a@example.org>\r\n\
              EHLO client\r\n\
              RCPT TO:<b@example.org>\r\n\
              DATA\r\n\
              MAIL <a@example.org>\r\n\
              MAIL FROM:<a@example.org>\r\n\
              RCPT TO:<>\r\n\
              DATA\r\n\
              VRFY someone\r\n\
              NOOP\r\n\
              RSET\r\n\
              DATA\r\n\
              QUIT\r\n",
        )
        .await;

        assert_eq!(
            codes(&output),
            vec!["220", "503", "250", "503", "503", "501", "250", "501", "503", "500", "250", "250", "503", "221"]
        );
    }

    #[tokio::test]
    async fn test_oversized_message() {
        let filter = Arc::new(RecordingFilter::default());
        let mut input = b"EHLO client\r\nMAIL FROM:<a@example.org>\r\nRCPT TO:<b@example.org>\r\nDATA\r\n".to_vec();
        for _ in 0..100 {
            input.extend_from_slice(b"0123456789012345678901234567890123456789\r\n");
        }
        input.extend_from_slice(b".\r\nMAIL FROM:<a@example.org>\r\nQUIT\r\n");

        let output = converse(filter.clone(), settings(), &input).await;

        // the session continues after the rejected message
        assert_eq!(codes(&output), vec!["220", "250", "250", "250", "354", "552", "250", "221"]);
        assert!(filter.reinjected.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_line_without_newline() {
        let filter = Arc::new(RecordingFilter::default());
        let mut input = b"EHLO client\r\nMAIL FROM:<a@example.org>\r\nRCPT TO:<b@example.org>\r\nDATA\r\n".to_vec();
        input.extend(std::iter::repeat(b'x').take(20_000));
        input.extend_from_slice(b"\r\n.\r\nQUIT\r\n");

        let output = converse(filter.clone(), settings(), &input).await;

        assert_eq!(codes(&output), vec!["220", "250", "250", "250", "354", "552", "221"]);
        assert!(filter.reinjected.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dot_inside_long_line_is_data() {
        let filter = Arc::new(RecordingFilter::default());
        let mut settings = settings();
        settings.max_message_size = 64 * 1024;

        let mut body = vec![b'a'; MAX_DATA_CHUNK];
        body.extend_from_slice(b".\r\n");
        let mut input = b"EHLO client\r\nMAIL FROM:<a@example.org>\r\nRCPT TO:<b@example.org>\r\nDATA\r\n".to_vec();
        input.extend_from_slice(&body);
        input.extend_from_slice(b".\r\nQUIT\r\n");

        let output = converse(filter.clone(), settings, &input).await;

        assert_eq!(codes(&output), vec!["220", "250", "250", "250", "354", "250", "221"]);
        assert_eq!(filter.reinjected.lock().unwrap()[0].data, body);
    }

    #[tokio::test]
    async fn test_idle_timeout() {
        let filter = Arc::new(RecordingFilter::default());
        let mut settings = settings();
        settings.idle_timeout = Duration::from_millis(50);

        let (client, server) = duplex(1024);
        let session = tokio::spawn(SmtpHandler::new(settings, filter, "test").handle(server));

        let (mut rx, _tx) = tokio::io::split(client);
        let mut output = String::new();
        rx.read_to_string(&mut output).await.unwrap();
        session.await.unwrap().unwrap();

        assert_eq!(codes(&output), vec!["220", "421"]);
    }

    #[test]
    fn test_parse_mail_from() {
        assert_eq!(parse_mail_from("FROM:<user@example.com>"), Some("user@example.com".to_string()));
        assert_eq!(parse_mail_from("FROM: <user@example.com>"), Some("user@example.com".to_string()));
        assert_eq!(
            parse_mail_from("from:<user@example.com> SIZE=1000 BODY=8BITMIME"),
            Some("user@example.com".to_string())
        );
        assert_eq!(parse_mail_from("FROM:user@example.com"), Some("user@example.com".to_string()));
        assert_eq!(parse_mail_from("FROM:<>"), Some(String::new()));
        // shape is left to the filter
        assert_eq!(parse_mail_from("FROM:<no-at-sign>"), Some("no-at-sign".to_string()));
        assert_eq!(parse_mail_from("invalid"), None);
        assert_eq!(parse_mail_from("FROM:<unterminated"), None);
    }

    #[test]
    fn test_parse_rcpt_to() {
        assert_eq!(parse_rcpt_to("TO:<user@example.com>"), Some("user@example.com".to_string()));
        assert_eq!(parse_rcpt_to("TO: <user@example.com>"), Some("user@example.com".to_string()));
        assert_eq!(
            parse_rcpt_to("TO:<user@example.com> ORCPT=rfc822;user@example.com"),
            Some("user@example.com".to_string())
        );
        assert_eq!(parse_rcpt_to("TO:<>"), None);
        assert_eq!(parse_rcpt_to("FROM:<user@example.com>"), None);
    }
}
