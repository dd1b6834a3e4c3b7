//! Sender blocklist filter

use crate::event::{AcceptEvent, DeliverEvent, Event};
use crate::filter::{Filter, FilterChain};
use async_trait::async_trait;
use ingress_common::config::FilterConfig;
use ingress_common::{Error, MailboxAddress, Result};
use std::collections::HashSet;
use tracing::{info, warn};

/// Refuses envelopes from listed sender addresses or sender domains.
///
/// On the accept pipeline the envelope is rejected without resolving the
/// recipient. On the deliver pipeline the message is dropped before it is
/// decoded.
#[derive(Debug, Clone, Default)]
pub struct SenderBlocklist {
    addresses: HashSet<MailboxAddress>,
    domains: HashSet<String>,
}

impl SenderBlocklist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the `[filters]` configuration section
    pub fn from_config(config: &FilterConfig) -> Result<Self> {
        let mut blocklist = Self::new();
        for sender in &config.blocked_senders {
            let address = MailboxAddress::parse(sender).map_err(|e| {
                Error::Config(format!("Invalid blocked sender: {}", e))
            })?;
            blocklist.addresses.insert(address);
        }
        for domain in &config.blocked_domains {
            blocklist = blocklist.with_domain(domain);
        }
        Ok(blocklist)
    }

    pub fn with_address(mut self, address: MailboxAddress) -> Self {
        self.addresses.insert(address);
        self
    }

    pub fn with_domain(mut self, domain: &str) -> Self {
        self.domains
            .insert(domain.trim().trim_start_matches('@').to_ascii_lowercase());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty() && self.domains.is_empty()
    }

    /// Unparseable senders are not blocked here; the pipelines decide about them
    pub fn is_blocked(&self, sender: &str) -> bool {
        match MailboxAddress::parse(sender) {
            Ok(address) => {
                self.addresses.contains(&address) || self.domains.contains(address.domain())
            }
            Err(_) => false,
        }
    }
}

#[async_trait]
impl Filter<AcceptEvent> for SenderBlocklist {
    async fn process(
        &self,
        event: &mut AcceptEvent,
        chain: FilterChain<'_, AcceptEvent>,
    ) -> Result<()> {
        if self.is_blocked(event.sender()) {
            info!(
                sender = %event.sender(),
                recipient = %event.recipient(),
                "Rejecting envelope from blocklisted sender"
            );
            event.set_accepted(false);
            return Ok(());
        }
        chain.proceed(event).await
    }
}

#[async_trait]
impl Filter<DeliverEvent> for SenderBlocklist {
    async fn process(
        &self,
        event: &mut DeliverEvent,
        chain: FilterChain<'_, DeliverEvent>,
    ) -> Result<()> {
        if self.is_blocked(event.sender()) {
            warn!(
                sender = %event.sender(),
                recipient = %event.recipient(),
                "Dropping message from blocklisted sender"
            );
            return Ok(());
        }
        chain.proceed(event).await
    }
}
