//! Envelope accept decision

use crate::event::{AcceptEvent, Event};
use crate::filter::{Filter, FilterChain, Terminal};
use crate::metrics::{EnvelopeOutcome, IngestMetrics};
use crate::resolver::MailboxResolver;
use async_trait::async_trait;
use ingress_common::{MailboxAddress, Result};
use std::sync::Arc;
use tracing::{debug, error};

/// Decides, before the body is transferred, whether an envelope is accepted
pub struct AcceptPipeline {
    filters: Vec<Arc<dyn Filter<AcceptEvent>>>,
    terminal: AcceptTerminal,
    metrics: Arc<IngestMetrics>,
}

impl AcceptPipeline {
    pub fn new(
        filters: Vec<Arc<dyn Filter<AcceptEvent>>>,
        resolver: MailboxResolver,
        metrics: Arc<IngestMetrics>,
    ) -> Self {
        Self {
            filters,
            terminal: AcceptTerminal { resolver },
            metrics,
        }
    }

    /// Returns whether mail from `sender` to `recipient` is accepted.
    ///
    /// An empty sender is refused before any filter runs.
    pub async fn accept(&self, sender: &str, recipient: &str) -> Result<bool> {
        debug!(sender = %sender, recipient = %recipient, "Accept?");

        if sender.is_empty() {
            error!(recipient = %recipient, "Cannot accept email with no sender address");
            self.metrics.record_envelope(EnvelopeOutcome::EmptySender);
            return Ok(false);
        }

        let mut event = AcceptEvent::new(sender, recipient);
        FilterChain::new(&self.filters, &self.terminal)
            .proceed(&mut event)
            .await?;

        let accepted = event.is_accepted();
        self.metrics.record_envelope(if accepted {
            EnvelopeOutcome::Accepted
        } else {
            EnvelopeOutcome::Rejected
        });
        Ok(accepted)
    }
}

struct AcceptTerminal {
    resolver: MailboxResolver,
}

#[async_trait]
impl Terminal<AcceptEvent> for AcceptTerminal {
    async fn execute(&self, event: &mut AcceptEvent) -> Result<()> {
        let recipient = match MailboxAddress::parse(event.recipient()) {
            Ok(address) => address,
            Err(e) => {
                debug!(error = %e, "Rejecting unparseable recipient");
                event.set_accepted(false);
                return Ok(());
            }
        };

        let accept = match self.resolver.resolve(&recipient).await? {
            Some(mailbox) => !mailbox.is_disabled(),
            None => false,
        };
        debug!(
            sender = %event.sender(),
            recipient = %recipient,
            accept,
            "Accept decision"
        );
        event.set_accepted(accept);
        Ok(())
    }
}
