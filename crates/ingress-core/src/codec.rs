//! Message decoding

use crate::event::BodyStream;
use async_trait::async_trait;
use chrono::Utc;
use ingress_common::{Envelope, Error, ParsedMessage, Result};
use mail_parser::MessageParser;
use tokio::io::AsyncReadExt;
use tracing::debug;

/// Number of body characters kept as preview
const PREVIEW_CHARS: usize = 500;

/// Turns a raw body stream into a [`ParsedMessage`]
#[async_trait]
pub trait MessageCodec: Send + Sync {
    async fn decode(&self, envelope: Envelope, body: BodyStream) -> Result<ParsedMessage>;
}

/// MIME codec backed by `mail-parser`
#[derive(Debug, Clone, Copy, Default)]
pub struct MimeCodec;

impl MimeCodec {
    pub fn new() -> Self {
        Self
    }

    fn parse(&self, envelope: Envelope, raw: Vec<u8>) -> Result<ParsedMessage> {
        let parsed = MessageParser::default()
            .parse(raw.as_slice())
            .ok_or_else(|| Error::Parse("Failed to parse message".to_string()))?;

        let subject = parsed.subject().map(|s| s.to_string());
        let from_header = parsed
            .from()
            .and_then(|a| a.first())
            .and_then(|a| a.address())
            .map(|a| a.to_string());
        let message_id = parsed.message_id().map(|s| s.to_string());
        let body_preview = parsed
            .body_text(0)
            .map(|s| s.chars().take(PREVIEW_CHARS).collect::<String>());
        let has_attachments = parsed.attachment_count() > 0;
        drop(parsed);

        debug!(
            sender = %envelope.sender,
            recipient = %envelope.recipient,
            size = raw.len(),
            "Decoded message"
        );

        Ok(ParsedMessage {
            envelope,
            subject,
            from_header,
            message_id,
            body_preview,
            has_attachments,
            raw,
            received_at: Utc::now(),
        })
    }
}

#[async_trait]
impl MessageCodec for MimeCodec {
    async fn decode(&self, envelope: Envelope, mut body: BodyStream) -> Result<ParsedMessage> {
        let mut raw = Vec::new();
        body.read_to_end(&mut raw)
            .await
            .map_err(|e| Error::Parse(format!("Failed to read message body: {}", e)))?;

        if raw.is_empty() {
            return Err(Error::Parse("Empty message body".to_string()));
        }

        self.parse(envelope, raw)
    }
}
