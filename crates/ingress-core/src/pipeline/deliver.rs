//! Message delivery and storage

use crate::codec::MessageCodec;
use crate::event::{BodyStream, DeliverEvent, Event};
use crate::filter::{Filter, FilterChain, Terminal};
use crate::metrics::{DeliveryOutcome, IngestMetrics};
use crate::resolver::MailboxResolver;
use async_trait::async_trait;
use ingress_common::config::DecodeFailurePolicy;
use ingress_common::{MailboxAddress, ParsedMessage, Result};
use ingress_storage::Mailbox;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Logged in place of a subject the message does not carry
pub const SUBJECT_PLACEHOLDER: &str = "[unreadable subject]";

/// Decodes and stores the body of an accepted envelope.
///
/// Store failures are logged and counted but never reach the caller, so
/// the peer still receives a success reply. Decode failures follow the
/// configured [`DecodeFailurePolicy`].
pub struct DeliverPipeline {
    filters: Vec<Arc<dyn Filter<DeliverEvent>>>,
    terminal: DeliverTerminal,
}

impl DeliverPipeline {
    pub fn new(
        filters: Vec<Arc<dyn Filter<DeliverEvent>>>,
        resolver: MailboxResolver,
        codec: Arc<dyn MessageCodec>,
        decode_failure_policy: DecodeFailurePolicy,
        metrics: Arc<IngestMetrics>,
    ) -> Self {
        Self {
            filters,
            terminal: DeliverTerminal {
                resolver,
                codec,
                decode_failure_policy,
                metrics,
            },
        }
    }

    pub async fn deliver(&self, sender: &str, recipient: &str, body: BodyStream) -> Result<()> {
        debug!(sender = %sender, recipient = %recipient, "Deliver email");
        let mut event = DeliverEvent::new(sender, recipient, body);
        FilterChain::new(&self.filters, &self.terminal)
            .proceed(&mut event)
            .await
    }
}

struct DeliverTerminal {
    resolver: MailboxResolver,
    codec: Arc<dyn MessageCodec>,
    decode_failure_policy: DecodeFailurePolicy,
    metrics: Arc<IngestMetrics>,
}

impl DeliverTerminal {
    async fn store(&self, mailbox: &dyn Mailbox, message: &ParsedMessage) {
        match mailbox.store(message).await {
            Ok(()) => {
                info!(
                    mailbox = %mailbox.address(),
                    size = message.size(),
                    "Message stored"
                );
                self.metrics.record_delivery(DeliveryOutcome::Stored);
            }
            Err(e) => {
                let subject = message.subject().unwrap_or(SUBJECT_PLACEHOLDER);
                error!(
                    mailbox = %mailbox.address(),
                    subject = %subject,
                    error = %e,
                    "Failed to store message"
                );
                self.metrics.record_delivery(DeliveryOutcome::StoreFailed);
            }
        }
    }
}

#[async_trait]
impl Terminal<DeliverEvent> for DeliverTerminal {
    async fn execute(&self, event: &mut DeliverEvent) -> Result<()> {
        let recipient = match MailboxAddress::parse(event.recipient()) {
            Ok(address) => address,
            Err(e) => {
                warn!(error = %e, "Dropping message for unparseable recipient");
                self.metrics.record_delivery(DeliveryOutcome::Dropped);
                return Ok(());
            }
        };

        let Some(mailbox) = self.resolver.resolve(&recipient).await? else {
            warn!(recipient = %recipient, "Mailbox vanished after accept, dropping message");
            self.metrics.record_delivery(DeliveryOutcome::Dropped);
            return Ok(());
        };

        let body = event.take_body()?;
        let message = match self.codec.decode(event.envelope(), body).await {
            Ok(message) => message,
            Err(e) => {
                self.metrics.record_delivery(DeliveryOutcome::DecodeFailed);
                match self.decode_failure_policy {
                    DecodeFailurePolicy::Propagate => return Err(e),
                    DecodeFailurePolicy::Isolate => {
                        error!(
                            sender = %event.sender(),
                            recipient = %recipient,
                            error = %e,
                            "Failed to decode message"
                        );
                        return Ok(());
                    }
                }
            }
        };

        self.store(mailbox.as_ref(), &message).await;
        Ok(())
    }
}
