//! Mailbox resolution

use ingress_common::{MailboxAddress, Result};
use ingress_storage::{Mailbox, MailboxFactory};
use std::sync::Arc;
use tracing::debug;

/// Resolves parsed addresses to mailboxes through a [`MailboxFactory`].
///
/// An unknown address yields `Ok(None)` and is only logged at debug level;
/// the caller decides whether that means reject or drop.
#[derive(Clone)]
pub struct MailboxResolver {
    factory: Arc<dyn MailboxFactory>,
}

impl MailboxResolver {
    pub fn new(factory: Arc<dyn MailboxFactory>) -> Self {
        Self { factory }
    }

    pub async fn resolve(&self, address: &MailboxAddress) -> Result<Option<Arc<dyn Mailbox>>> {
        let mailbox = self.factory.mailbox(address).await?;
        if mailbox.is_none() {
            debug!(address = %address, "No mailbox for address");
        }
        Ok(mailbox)
    }
}
