//! Decoded inbound message

use chrono::{DateTime, Utc};

/// SMTP envelope of a single delivery (MAIL FROM / RCPT TO, as received)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub sender: String,
    pub recipient: String,
}

impl Envelope {
    pub fn new(sender: impl Into<String>, recipient: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            recipient: recipient.into(),
        }
    }
}

/// A message body decoded by a message codec, ready to be stored
#[derive(Debug, Clone)]
pub struct ParsedMessage {
    pub envelope: Envelope,
    pub subject: Option<String>,
    /// Address from the `From:` header, which may differ from the envelope sender
    pub from_header: Option<String>,
    pub message_id: Option<String>,
    /// First 500 characters of the text body
    pub body_preview: Option<String>,
    pub has_attachments: bool,
    pub raw: Vec<u8>,
    pub received_at: DateTime<Utc>,
}

impl ParsedMessage {
    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    pub fn size(&self) -> usize {
        self.raw.len()
    }
}
