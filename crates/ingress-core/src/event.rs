//! Events carried through the ingestion pipelines
//!
//! An event holds the SMTP envelope exactly as the transport received it
//! (unparsed) plus the payload of one decision. Events are created per
//! envelope or per message and never shared between connections.

use ingress_common::{Envelope, Error, Result};
use std::fmt;
use tokio::io::AsyncRead;

/// Raw message bytes as streamed by the transport
pub type BodyStream = Box<dyn AsyncRead + Send + Unpin>;

/// Common view of every pipeline event
pub trait Event: Send + 'static {
    /// Envelope sender (MAIL FROM), as received
    fn sender(&self) -> &str;

    /// Envelope recipient (RCPT TO), as received
    fn recipient(&self) -> &str;
}

/// Envelope-level accept decision
#[derive(Debug, Clone)]
pub struct AcceptEvent {
    sender: String,
    recipient: String,
    accept: bool,
}

impl AcceptEvent {
    /// New event; the outcome starts as rejected
    pub fn new(sender: impl Into<String>, recipient: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            recipient: recipient.into(),
            accept: false,
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.accept
    }

    pub fn set_accepted(&mut self, accept: bool) {
        self.accept = accept;
    }
}

impl Event for AcceptEvent {
    fn sender(&self) -> &str {
        &self.sender
    }

    fn recipient(&self) -> &str {
        &self.recipient
    }
}

/// Delivery of one message body for an accepted envelope
pub struct DeliverEvent {
    sender: String,
    recipient: String,
    body: Option<BodyStream>,
}

impl DeliverEvent {
    pub fn new(sender: impl Into<String>, recipient: impl Into<String>, body: BodyStream) -> Self {
        Self {
            sender: sender.into(),
            recipient: recipient.into(),
            body: Some(body),
        }
    }

    /// Take ownership of the body stream. Succeeds once per event.
    pub fn take_body(&mut self) -> Result<BodyStream> {
        self.body.take().ok_or_else(|| {
            Error::Internal(format!(
                "Message body for {} was already consumed",
                self.recipient
            ))
        })
    }

    pub fn body_consumed(&self) -> bool {
        self.body.is_none()
    }

    pub fn envelope(&self) -> Envelope {
        Envelope::new(self.sender.as_str(), self.recipient.as_str())
    }
}

impl Event for DeliverEvent {
    fn sender(&self) -> &str {
        &self.sender
    }

    fn recipient(&self) -> &str {
        &self.recipient
    }
}

impl fmt::Debug for DeliverEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliverEvent")
            .field("sender", &self.sender)
            .field("recipient", &self.recipient)
            .field("body_consumed", &self.body_consumed())
            .finish()
    }
}
