//! Mailbox capabilities and the directory-backed mailbox factory

use crate::file::FileStorage;
use async_trait::async_trait;
use ingress_common::config::MailboxConfig;
use ingress_common::{Error, MailboxAddress, ParsedMessage, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// A delivery destination for one address
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Address this mailbox receives for
    fn address(&self) -> &MailboxAddress;

    /// Whether new mail must be refused
    fn is_disabled(&self) -> bool;

    /// Persist a decoded message
    async fn store(&self, message: &ParsedMessage) -> Result<()>;
}

/// Looks up mailboxes by address.
///
/// `Ok(None)` means the address is unknown, which is an ordinary outcome.
/// Errors are reserved for backend faults.
#[async_trait]
pub trait MailboxFactory: Send + Sync {
    async fn mailbox(&self, address: &MailboxAddress) -> Result<Option<Arc<dyn Mailbox>>>;
}

/// Mailbox that writes raw messages below `<domain>/<local>/` in a file storage
pub struct DirectoryMailbox {
    address: MailboxAddress,
    disabled: bool,
    storage: Arc<dyn FileStorage>,
}

impl DirectoryMailbox {
    pub fn new(address: MailboxAddress, disabled: bool, storage: Arc<dyn FileStorage>) -> Self {
        Self {
            address,
            disabled,
            storage,
        }
    }

    /// Directory (relative to the storage root) holding this mailbox's messages
    pub fn directory(&self) -> String {
        format!(
            "{}/{}",
            sanitize_segment(self.address.domain()),
            sanitize_segment(self.address.local())
        )
    }

    /// File names of stored messages, oldest first
    pub async fn messages(&self) -> Result<Vec<String>> {
        self.storage.list(&self.directory()).await
    }

    fn message_path(&self, message: &ParsedMessage) -> String {
        format!(
            "{}/{}-{}.eml",
            self.directory(),
            message.received_at.format("%Y%m%d%H%M%S"),
            Uuid::now_v7()
        )
    }
}

#[async_trait]
impl Mailbox for DirectoryMailbox {
    fn address(&self) -> &MailboxAddress {
        &self.address
    }

    fn is_disabled(&self) -> bool {
        self.disabled
    }

    async fn store(&self, message: &ParsedMessage) -> Result<()> {
        let path = self.message_path(message);
        self.storage.store(&path, &message.raw).await?;

        debug!(
            mailbox = %self.address,
            path = %path,
            size = message.size(),
            "Message stored"
        );
        Ok(())
    }
}

/// Path separators in an address must not create extra directories
fn sanitize_segment(segment: &str) -> String {
    segment.replace(['/', '\\'], "_")
}

/// Mailbox factory over a fixed set of configured mailboxes
pub struct DirectoryMailboxFactory {
    mailboxes: HashMap<MailboxAddress, Arc<DirectoryMailbox>>,
}

impl DirectoryMailboxFactory {
    /// Build the factory from `[[mailboxes]]` entries
    pub fn from_config(entries: &[MailboxConfig], storage: Arc<dyn FileStorage>) -> Result<Self> {
        let mut mailboxes = HashMap::with_capacity(entries.len());

        for entry in entries {
            let address = MailboxAddress::parse(&entry.address).map_err(|e| {
                Error::Config(format!("Invalid mailbox in configuration: {}", e))
            })?;

            let mailbox = DirectoryMailbox::new(address.clone(), entry.disabled, storage.clone());
            if mailboxes.insert(address.clone(), Arc::new(mailbox)).is_some() {
                return Err(Error::Config(format!(
                    "Mailbox configured twice: {}",
                    address
                )));
            }
        }

        info!(count = mailboxes.len(), "Loaded mailboxes");

        Ok(Self { mailboxes })
    }

    pub fn len(&self) -> usize {
        self.mailboxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mailboxes.is_empty()
    }
}

#[async_trait]
impl MailboxFactory for DirectoryMailboxFactory {
    async fn mailbox(&self, address: &MailboxAddress) -> Result<Option<Arc<dyn Mailbox>>> {
        Ok(self
            .mailboxes
            .get(address)
            .map(|mailbox| mailbox.clone() as Arc<dyn Mailbox>))
    }
}
