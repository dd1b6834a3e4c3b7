//! SMTP session handler

use crate::event::BodyStream;
use crate::pipeline::MessageListener;
use crate::smtp::listener::ListenerSettings;
use ingress_common::Result;
use std::io::{self, Cursor};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Advertised name when no hostname is configured
pub const DEFAULT_HOSTNAME: &str = "localhost";

/// Maximum recipients per transaction
const MAX_RECIPIENTS: usize = 100;

/// Longest command line accepted, CRLF included
const MAX_COMMAND_LINE: usize = 1000;

/// SMTP session state
#[derive(Debug, Clone, Copy, PartialEq)]
enum SessionState {
    Connected,
    Greeted,
    MailFrom,
    RcptTo,
}

/// Envelope collected between MAIL and DATA
#[derive(Debug, Default)]
struct Transaction {
    sender: Option<String>,
    recipients: Vec<String>,
}

impl Transaction {
    fn reset(&mut self) {
        self.sender = None;
        self.recipients.clear();
    }
}

/// How a pass over one stream ended
enum SessionEnd<S> {
    Closed,
    StartTls(S),
}

/// One bounded line read
#[derive(Debug, PartialEq)]
enum LineRead {
    Line,
    /// Over the limit; the rest of the line was consumed and dropped
    TooLong,
    Eof,
}

enum DataOutcome {
    Complete(Vec<u8>),
    TooLarge,
}

/// One SMTP conversation.
///
/// Commands are read line by line; RCPT and DATA call into the
/// [`MessageListener`] inline, so a connection never runs two pipeline
/// steps at once.
pub struct SmtpSession {
    settings: Arc<ListenerSettings>,
    listener: Arc<dyn MessageListener>,
    peer_addr: SocketAddr,
    shutdown: CancellationToken,
}

impl SmtpSession {
    pub fn new(
        settings: Arc<ListenerSettings>,
        listener: Arc<dyn MessageListener>,
        peer_addr: SocketAddr,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            settings,
            listener,
            peer_addr,
            shutdown,
        }
    }

    fn hostname(&self) -> &str {
        self.settings.hostname.as_deref().unwrap_or(DEFAULT_HOSTNAME)
    }

    /// Handle an SMTP session, upgrading to TLS when the client asks for it
    pub async fn handle<S>(self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        match self.run(stream, false).await? {
            SessionEnd::Closed => Ok(()),
            SessionEnd::StartTls(stream) => {
                let Some(acceptor) = self.settings.tls.acceptor() else {
                    return Ok(());
                };
                let stream = acceptor.accept(stream).await?;
                debug!(peer = %self.peer_addr, "STARTTLS handshake completed");
                match self.run(stream, true).await? {
                    SessionEnd::Closed | SessionEnd::StartTls(_) => Ok(()),
                }
            }
        }
    }

    async fn run<S>(&self, stream: S, secure: bool) -> Result<SessionEnd<S>>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let mut stream = BufReader::new(stream);
        let mut state = SessionState::Connected;
        let mut transaction = Transaction::default();

        // After STARTTLS the client starts over with EHLO, no new greeting
        if !secure {
            self.send_response(&mut stream, 220, &format!("{} ESMTP Ingress", self.hostname()))
                .await?;
        }

        let mut buf = Vec::new();

        loop {
            buf.clear();
            let read = tokio::select! {
                read = self.read_line(&mut stream, &mut buf, MAX_COMMAND_LINE) => Some(read),
                _ = self.shutdown.cancelled() => None,
            };

            let read = match read {
                Some(Ok(read)) => read,
                Some(Err(e)) if e.kind() == io::ErrorKind::TimedOut => {
                    debug!(peer = %self.peer_addr, "Idle timeout");
                    self.send_response(&mut stream, 421, "4.4.2 Idle timeout, closing connection")
                        .await?;
                    return Ok(SessionEnd::Closed);
                }
                Some(Err(e)) => return Err(e.into()),
                None => {
                    self.send_response(&mut stream, 421, "4.3.2 Service shutting down")
                        .await?;
                    return Ok(SessionEnd::Closed);
                }
            };

            match read {
                LineRead::Line => {}
                LineRead::TooLong => {
                    warn!(peer = %self.peer_addr, "Command line too long");
                    self.send_response(&mut stream, 500, "5.5.6 Line too long").await?;
                    continue;
                }
                LineRead::Eof => {
                    debug!("Client {} disconnected", self.peer_addr);
                    return Ok(SessionEnd::Closed);
                }
            }

            let line = String::from_utf8_lossy(&buf);
            let line = line.trim();
            debug!("SMTP from {}: {}", self.peer_addr, line);

            let (command, args) = parse_command(line);

            match command.to_ascii_uppercase().as_str() {
                "HELO" => {
                    transaction.reset();
                    state = SessionState::Greeted;
                    self.send_response(
                        &mut stream,
                        250,
                        &format!("{} Hello {}", self.hostname(), args),
                    )
                    .await?;
                }

                "EHLO" => {
                    transaction.reset();
                    state = SessionState::Greeted;

                    let mut responses = vec![
                        format!("{} Hello {}", self.hostname(), args),
                        format!("SIZE {}", self.settings.max_message_size),
                        "8BITMIME".to_string(),
                        "PIPELINING".to_string(),
                        "ENHANCEDSTATUSCODES".to_string(),
                    ];

                    if self.settings.tls.is_enabled() && !secure {
                        responses.push("STARTTLS".to_string());
                    }

                    self.send_multiline(&mut stream, 250, &responses).await?;
                }

                "STARTTLS" => {
                    if secure {
                        self.send_response(&mut stream, 503, "5.5.1 TLS already active")
                            .await?;
                    } else if !self.settings.tls.is_enabled() {
                        self.send_response(&mut stream, 502, "5.5.1 STARTTLS not supported")
                            .await?;
                    } else if state == SessionState::Connected {
                        self.send_response(&mut stream, 503, "5.5.1 Send EHLO first")
                            .await?;
                    } else {
                        self.send_response(&mut stream, 220, "2.0.0 Ready to start TLS")
                            .await?;
                        return Ok(SessionEnd::StartTls(stream.into_inner()));
                    }
                }

                "AUTH" => {
                    // Acceptance is decided per recipient, never by login
                    self.send_response(&mut stream, 502, "5.5.1 AUTH not supported")
                        .await?;
                }

                "MAIL" => {
                    if state != SessionState::Greeted {
                        self.send_response(&mut stream, 503, "5.5.1 Bad sequence of commands")
                            .await?;
                        continue;
                    }

                    match parse_mail_from(args) {
                        Some(sender) => {
                            transaction.sender = Some(sender.to_string());
                            state = SessionState::MailFrom;
                            self.send_response(&mut stream, 250, "2.1.0 OK").await?;
                        }
                        None => {
                            self.send_response(&mut stream, 501, "5.1.7 Bad sender address syntax")
                                .await?;
                        }
                    }
                }

                "RCPT" => {
                    if state != SessionState::MailFrom && state != SessionState::RcptTo {
                        self.send_response(&mut stream, 503, "5.5.1 Bad sequence of commands")
                            .await?;
                        continue;
                    }

                    let Some(recipient) = parse_rcpt_to(args) else {
                        self.send_response(&mut stream, 501, "5.1.3 Bad recipient address syntax")
                            .await?;
                        continue;
                    };

                    if transaction.recipients.len() >= MAX_RECIPIENTS {
                        self.send_response(&mut stream, 452, "4.5.3 Too many recipients")
                            .await?;
                        continue;
                    }

                    let sender = transaction.sender.as_deref().unwrap_or_default();
                    match self.listener.accept(sender, recipient).await {
                        Ok(true) => {
                            transaction.recipients.push(recipient.to_string());
                            state = SessionState::RcptTo;
                            self.send_response(&mut stream, 250, "2.1.5 OK").await?;
                        }
                        Ok(false) => {
                            self.send_response(&mut stream, 550, "5.1.1 Recipient address rejected")
                                .await?;
                        }
                        Err(e) => {
                            warn!(peer = %self.peer_addr, error = %e, "Accept check failed");
                            let (code, message) = e.smtp_reply();
                            self.send_response(&mut stream, code, message).await?;
                        }
                    }
                }

                "DATA" => {
                    if state != SessionState::RcptTo || transaction.recipients.is_empty() {
                        self.send_response(&mut stream, 503, "5.5.1 Bad sequence of commands")
                            .await?;
                        continue;
                    }

                    self.send_response(&mut stream, 354, "Start mail input; end with <CRLF>.<CRLF>")
                        .await?;

                    match self.read_data(&mut stream).await? {
                        DataOutcome::Complete(data) => {
                            let (code, message) = self.deliver(&transaction, data).await;
                            self.send_response(&mut stream, code, &message).await?;
                        }
                        DataOutcome::TooLarge => {
                            warn!(peer = %self.peer_addr, "Message exceeds size limit");
                            self.send_response(
                                &mut stream,
                                552,
                                "5.3.4 Message size exceeds fixed maximum message size",
                            )
                            .await?;
                        }
                    }

                    state = SessionState::Greeted;
                    transaction.reset();
                }

                "RSET" => {
                    transaction.reset();
                    if state != SessionState::Connected {
                        state = SessionState::Greeted;
                    }
                    self.send_response(&mut stream, 250, "2.0.0 OK").await?;
                }

                "NOOP" => {
                    self.send_response(&mut stream, 250, "2.0.0 OK").await?;
                }

                "QUIT" => {
                    self.send_response(&mut stream, 221, "2.0.0 Bye").await?;
                    return Ok(SessionEnd::Closed);
                }

                "VRFY" => {
                    self.send_response(&mut stream, 252, "2.5.2 Cannot VRFY user")
                        .await?;
                }

                "EXPN" => {
                    self.send_response(&mut stream, 502, "5.5.1 EXPN not supported")
                        .await?;
                }

                _ => {
                    self.send_response(&mut stream, 500, "5.5.2 Command not recognized")
                        .await?;
                }
            }
        }
    }

    /// Run the deliver pipeline once per accepted recipient.
    ///
    /// Every recipient is attempted. The transaction fails only when none
    /// of them succeeded, so a client retry never duplicates a stored copy.
    async fn deliver(&self, transaction: &Transaction, data: Vec<u8>) -> (u16, String) {
        let sender = transaction.sender.as_deref().unwrap_or_default();
        let data: Arc<[u8]> = data.into();
        let mut delivered = 0;
        let mut failure = None;

        for recipient in &transaction.recipients {
            let body: BodyStream = Box::new(Cursor::new(data.clone()));
            match self.listener.deliver(sender, recipient, body).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(
                        peer = %self.peer_addr,
                        recipient = %recipient,
                        error = %e,
                        "Failed to deliver message"
                    );
                    failure.get_or_insert(e);
                }
            }
        }

        if let Some(e) = failure {
            if delivered == 0 {
                let (code, message) = e.smtp_reply();
                return (code, message.to_string());
            }
            error!(
                peer = %self.peer_addr,
                delivered,
                failed = transaction.recipients.len() - delivered,
                "Message accepted for some recipients only"
            );
        }

        info!(
            peer = %self.peer_addr,
            recipients = transaction.recipients.len(),
            size = data.len(),
            "Message accepted"
        );
        (250, "2.0.0 OK: message accepted".to_string())
    }

    /// Read one line of at most `limit` bytes into `buf`
    async fn read_line<R: AsyncBufRead + Unpin>(
        &self,
        reader: &mut R,
        buf: &mut Vec<u8>,
        limit: usize,
    ) -> io::Result<LineRead> {
        let n = self.read_bounded(reader, buf, limit).await?;
        if n == 0 {
            return Ok(LineRead::Eof);
        }
        if n < limit || buf.ends_with(b"\n") {
            return Ok(LineRead::Line);
        }

        let mut rest = Vec::new();
        loop {
            rest.clear();
            let n = self.read_bounded(reader, &mut rest, limit).await?;
            if n == 0 || rest.ends_with(b"\n") {
                return Ok(LineRead::TooLong);
            }
        }
    }

    async fn read_bounded<R: AsyncBufRead + Unpin>(
        &self,
        reader: &mut R,
        buf: &mut Vec<u8>,
        limit: usize,
    ) -> io::Result<usize> {
        let mut limited = (&mut *reader).take(limit as u64);
        match timeout(self.settings.idle_timeout, limited.read_until(b'\n', buf)).await {
            Ok(read) => read,
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "idle timeout")),
        }
    }

    /// Read message data until <CRLF>.<CRLF>.
    ///
    /// An oversized message is read to its end and discarded so the
    /// session stays in sync with the client.
    async fn read_data<R: AsyncBufRead + Unpin>(&self, reader: &mut R) -> Result<DataOutcome> {
        let mut data = Vec::new();
        let mut line = Vec::new();
        let mut too_large = false;
        // Room for a stuffed dot and CRLF around a maximal message
        let limit = self.settings.max_message_size.saturating_add(3);

        loop {
            line.clear();
            match self.read_line(reader, &mut line, limit).await? {
                LineRead::Line => {}
                LineRead::TooLong => {
                    too_large = true;
                    data = Vec::new();
                    continue;
                }
                LineRead::Eof => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "Connection closed during DATA",
                    )
                    .into());
                }
            }

            if line == b".\r\n" || line == b".\n" {
                break;
            }

            if too_large {
                continue;
            }

            // Dot-stuffing
            let line_bytes = match line.first() {
                Some(b'.') => &line[1..],
                _ => &line[..],
            };
            data.extend_from_slice(line_bytes);

            if data.len() > self.settings.max_message_size {
                too_large = true;
                data = Vec::new();
            }
        }

        if too_large {
            Ok(DataOutcome::TooLarge)
        } else {
            Ok(DataOutcome::Complete(data))
        }
    }

    /// Send an SMTP response
    async fn send_response<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut W,
        code: u16,
        message: &str,
    ) -> Result<()> {
        let response = format!("{} {}\r\n", code, message);
        writer.write_all(response.as_bytes()).await?;
        writer.flush().await?;
        debug!("SMTP to {}: {}", self.peer_addr, response.trim());
        Ok(())
    }

    /// Send a multi-line response
    async fn send_multiline<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut W,
        code: u16,
        lines: &[String],
    ) -> Result<()> {
        let mut response = String::new();
        for (i, line) in lines.iter().enumerate() {
            let separator = if i + 1 == lines.len() { ' ' } else { '-' };
            response.push_str(&format!("{}{}{}\r\n", code, separator, line));
        }
        writer.write_all(response.as_bytes()).await?;
        writer.flush().await?;
        debug!("SMTP to {}: {} ({} lines)", self.peer_addr, code, lines.len());
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

/// Strip a `KEYWORD:` prefix case-insensitively
fn strip_keyword<'a>(args: &'a str, keyword: &str) -> Option<&'a str> {
    let args = args.trim();
    let prefix = args.get(..keyword.len())?;
    if prefix.eq_ignore_ascii_case(keyword) {
        Some(args[keyword.len()..].trim())
    } else {
        None
    }
}

/// Extract the path from `<address> [params]` or a bare address
fn extract_path(addr_part: &str) -> Option<&str> {
    if addr_part.starts_with('<') {
        let end = addr_part.find('>')?;
        Some(&addr_part[1..end])
    } else {
        addr_part.split_whitespace().next()
    }
}

/// Parse MAIL FROM:<address>; the null sender yields an empty string
fn parse_mail_from(args: &str) -> Option<&str> {
    let addr_part = strip_keyword(args, "FROM:")?;
    if addr_part == "<>" {
        return Some("");
    }
    extract_path(addr_part)
}

/// Parse RCPT TO:<address>
fn parse_rcpt_to(args: &str) -> Option<&str> {
    let addr_part = strip_keyword(args, "TO:")?;
    extract_path(addr_part).filter(|address| !address.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smtp::listener::TlsMode;
    use async_trait::async_trait;
    use ingress_common::Error;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt, DuplexStream};

    #[test]
    fn test_parse_mail_from() {
        assert_eq!(parse_mail_from("FROM:<user@example.com>"), Some("user@example.com"));
        assert_eq!(parse_mail_from("FROM: <user@example.com>"), Some("user@example.com"));
        assert_eq!(
            parse_mail_from("from:<user@example.com> SIZE=1024"),
            Some("user@example.com")
        );
        assert_eq!(parse_mail_from("FROM:<>"), Some(""));
        assert_eq!(parse_mail_from("invalid"), None);
    }

    #[test]
    fn test_parse_rcpt_to() {
        assert_eq!(parse_rcpt_to("TO:<user@example.com>"), Some("user@example.com"));
        assert_eq!(parse_rcpt_to("TO: <user@example.com>"), Some("user@example.com"));
        assert_eq!(parse_rcpt_to("TO:user@example.com"), Some("user@example.com"));
        assert_eq!(parse_rcpt_to("TO:<>"), None);
        assert_eq!(parse_rcpt_to("FROM:<user@example.com>"), None);
    }

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command("MAIL FROM:<a@b.c>"), ("MAIL", "FROM:<a@b.c>"));
        assert_eq!(parse_command("QUIT"), ("QUIT", ""));
    }

    /// Accepts every recipient ending in `@example.com` and records deliveries
    #[derive(Default)]
    struct RecordingListener {
        accepts: Mutex<Vec<(String, String)>>,
        deliveries: Mutex<Vec<(String, String, Vec<u8>)>>,
        unreachable: Option<&'static str>,
    }

    #[async_trait]
    impl MessageListener for RecordingListener {
        async fn accept(&self, sender: &str, recipient: &str) -> Result<bool> {
            self.accepts
                .lock()
                .unwrap()
                .push((sender.to_string(), recipient.to_string()));
            Ok(!sender.is_empty() && recipient.ends_with("@example.com"))
        }

        async fn deliver(&self, sender: &str, recipient: &str, mut body: BodyStream) -> Result<()> {
            if self.unreachable == Some(recipient) {
                return Err(Error::Storage("mailbox backend unavailable".to_string()));
            }
            let mut data = Vec::new();
            body.read_to_end(&mut data).await?;
            self.deliveries
                .lock()
                .unwrap()
                .push((sender.to_string(), recipient.to_string(), data));
            Ok(())
        }
    }

    fn settings(max_message_size: usize) -> Arc<ListenerSettings> {
        Arc::new(ListenerSettings {
            bind_addr: "127.0.0.1:0".to_string(),
            hostname: Some("mx.example.com".to_string()),
            tls: TlsMode::Disabled,
            proxy_protocol_v2: false,
            max_connections: 10,
            max_message_size,
            idle_timeout: Duration::from_secs(30),
        })
    }

    /// Drive a session with a scripted client and return the server's output
    async fn converse(
        listener: Arc<RecordingListener>,
        max_message_size: usize,
        script: &str,
    ) -> String {
        let (mut client, server): (DuplexStream, DuplexStream) = duplex(64 * 1024);
        let session = SmtpSession::new(
            settings(max_message_size),
            listener,
            "127.0.0.1:4000".parse().unwrap(),
            CancellationToken::new(),
        );
        let task = tokio::spawn(session.handle(server));

        client.write_all(script.as_bytes()).await.unwrap();
        let mut output = String::new();
        client.read_to_string(&mut output).await.unwrap();
        task.await.unwrap().unwrap();
        output
    }

    fn codes(output: &str) -> Vec<&str> {
        output
            .lines()
            .filter(|line| line.as_bytes().get(3) == Some(&b' '))
            .map(|line| &line[..3])
            .collect()
    }

    #[tokio::test]
    async fn test_full_transaction() {
        let listener = Arc::new(RecordingListener::default());
        let script = "EHLO client.test\r\n\
MAIL FROM:<bob@x.com>\r\n\
RCPT TO:<alice@example.com>\r\n\
RCPT TO:<carol@example.com>\r\n\
DATA\r\n\
Subject: Hi\r\n\
\r\n\
..leading dot\r\n\
.\r\n\
QUIT\r\n";

        let output = converse(listener.clone(), 1024, script).await;

        assert!(output.starts_with("220 mx.example.com ESMTP Ingress"));
        assert!(output.contains("250-SIZE 1024"));
        assert!(!output.contains("STARTTLS"));
        assert_eq!(
            codes(&output),
            vec!["220", "250", "250", "250", "250", "354", "250", "221"]
        );

        let deliveries = listener.deliveries.lock().unwrap();
        assert_eq!(deliveries.len(), 2);
        assert_eq!(deliveries[0].0, "bob@x.com");
        assert_eq!(deliveries[0].1, "alice@example.com");
        assert_eq!(deliveries[1].1, "carol@example.com");
        assert_eq!(
            deliveries[0].2,
            b"Subject: Hi\r\n\r\n.leading dot\r\n".to_vec()
        );
    }

    #[tokio::test]
    async fn test_rejected_recipient_and_null_sender() {
        let listener = Arc::new(RecordingListener::default());
        let script = "HELO client.test\r\n\
MAIL FROM:<bob@x.com>\r\n\
RCPT TO:<someone@elsewhere.test>\r\n\
DATA\r\n\
RSET\r\n\
MAIL FROM:<>\r\n\
RCPT TO:<alice@example.com>\r\n\
QUIT\r\n";

        let output = converse(listener.clone(), 1024, script).await;

        assert_eq!(
            codes(&output),
            vec!["220", "250", "250", "550", "503", "250", "250", "550", "221"]
        );
        let accepts = listener.accepts.lock().unwrap();
        assert_eq!(accepts.len(), 2);
        assert_eq!(accepts[1], ("".to_string(), "alice@example.com".to_string()));
        assert!(listener.deliveries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_message_is_refused() {
        let listener = Arc::new(RecordingListener::default());
        let script = format!(
            "EHLO client.test\r\n\
MAIL FROM:<bob@x.com>\r\n\
RCPT TO:<alice@example.com>\r\n\
DATA\r\n\
{}\r\n\
.\r\n\
NOOP\r\n\
QUIT\r\n",
            "x".repeat(200)
        );

        let output = converse(listener.clone(), 64, &script).await;

        assert_eq!(
            codes(&output),
            vec!["220", "250", "250", "250", "354", "552", "250", "221"]
        );
        assert!(listener.deliveries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_auth_and_sequence_errors() {
        let listener = Arc::new(RecordingListener::default());
        let script = "MAIL FROM:<bob@x.com>\r\n\
EHLO client.test\r\n\
AUTH PLAIN AGJvYgBzZWNyZXQ=\r\n\
STARTTLS\r\n\
RCPT TO:<alice@example.com>\r\n\
BOGUS\r\n\
QUIT\r\n";

        let output = converse(listener, 1024, script).await;

        assert_eq!(
            codes(&output),
            vec!["220", "503", "250", "502", "502", "503", "500", "221"]
        );
    }

    #[tokio::test]
    async fn test_shutdown_closes_idle_session() {
        let listener: Arc<dyn MessageListener> = Arc::new(RecordingListener::default());
        let (mut client, server) = duplex(4096);
        let shutdown = CancellationToken::new();
        let session = SmtpSession::new(
            settings(1024),
            listener,
            "127.0.0.1:4000".parse().unwrap(),
            shutdown.clone(),
        );
        let task = tokio::spawn(session.handle(server));

        let mut greeting = [0u8; 4];
        client.read_exact(&mut greeting).await.unwrap();
        assert_eq!(&greeting, b"220 ");

        shutdown.cancel();
        task.await.unwrap().unwrap();

        let mut rest = String::new();
        client.read_to_string(&mut rest).await.unwrap();
        assert!(rest.contains("421 4.3.2 Service shutting down"));
    }

    #[tokio::test]
    async fn test_overlong_command_line_is_refused() {
        let listener = Arc::new(RecordingListener::default());
        let script = format!(
            "EHLO client.test\r\nNOOP {}\r\nNOOP\r\nQUIT\r\n",
            "x".repeat(4 * MAX_COMMAND_LINE)
        );

        let output = converse(listener, 1024, &script).await;

        assert!(output.contains("500 5.5.6 Line too long"));
        assert_eq!(codes(&output), vec!["220", "250", "500", "250", "221"]);
    }

    #[tokio::test]
    async fn test_line_without_newline_is_not_buffered() {
        let session = SmtpSession::new(
            settings(64),
            Arc::new(RecordingListener::default()),
            "127.0.0.1:4000".parse().unwrap(),
            CancellationToken::new(),
        );
        let flood = vec![b'x'; 1024 * 1024];
        let mut reader = flood.as_slice();
        let mut buf = Vec::new();

        let read = session
            .read_line(&mut reader, &mut buf, MAX_COMMAND_LINE)
            .await
            .unwrap();

        assert_eq!(read, LineRead::TooLong);
        assert_eq!(buf.len(), MAX_COMMAND_LINE);
        assert!(reader.is_empty());
    }

    #[tokio::test]
    async fn test_failed_recipient_does_not_fail_stored_ones() {
        let listener = Arc::new(RecordingListener {
            unreachable: Some("carol@example.com"),
            ..RecordingListener::default()
        });
        let script = "EHLO client.test\r\n\
MAIL FROM:<bob@x.com>\r\n\
RCPT TO:<alice@example.com>\r\n\
RCPT TO:<carol@example.com>\r\n\
DATA\r\n\
Subject: Hi\r\n\
.\r\n\
QUIT\r\n";

        let output = converse(listener.clone(), 1024, script).await;

        assert_eq!(
            codes(&output),
            vec!["220", "250", "250", "250", "250", "354", "250", "221"]
        );
        let deliveries = listener.deliveries.lock().unwrap();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].1, "alice@example.com");
    }

    #[tokio::test]
    async fn test_transaction_fails_when_no_recipient_was_stored() {
        let listener = Arc::new(RecordingListener {
            unreachable: Some("carol@example.com"),
            ..RecordingListener::default()
        });
        let script = "EHLO client.test\r\n\
MAIL FROM:<bob@x.com>\r\n\
RCPT TO:<carol@example.com>\r\n\
DATA\r\n\
Subject: Hi\r\n\
.\r\n\
QUIT\r\n";

        let output = converse(listener.clone(), 1024, script).await;

        assert_eq!(
            codes(&output),
            vec!["220", "250", "250", "250", "354", "451", "221"]
        );
        assert!(listener.deliveries.lock().unwrap().is_empty());
    }
}
