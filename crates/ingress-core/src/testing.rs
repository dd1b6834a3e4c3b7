//! In-memory doubles shared by the unit tests

use crate::codec::MessageCodec;
use crate::event::BodyStream;
use async_trait::async_trait;
use ingress_common::{Envelope, Error, MailboxAddress, ParsedMessage, Result};
use ingress_storage::{Mailbox, MailboxFactory};
use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};
use tracing::subscriber::DefaultGuard;

/// Mailbox that keeps stored messages in memory
pub struct MemoryMailbox {
    address: MailboxAddress,
    disabled: bool,
    fail_store: bool,
    stored: Mutex<Vec<ParsedMessage>>,
}

impl MemoryMailbox {
    fn new(address: &str) -> Self {
        Self {
            address: MailboxAddress::parse(address).unwrap(),
            disabled: false,
            fail_store: false,
            stored: Mutex::new(Vec::new()),
        }
    }

    pub fn stored(&self) -> Vec<ParsedMessage> {
        self.stored.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailbox for MemoryMailbox {
    fn address(&self) -> &MailboxAddress {
        &self.address
    }

    fn is_disabled(&self) -> bool {
        self.disabled
    }

    async fn store(&self, message: &ParsedMessage) -> Result<()> {
        if self.fail_store {
            return Err(Error::Storage("disk full".to_string()));
        }
        self.stored.lock().unwrap().push(message.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryMailboxFactory {
    mailboxes: HashMap<MailboxAddress, Arc<MemoryMailbox>>,
    fail_lookups: bool,
}

impl MemoryMailboxFactory {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(mut self, mailbox: MemoryMailbox) -> Self {
        self.mailboxes
            .insert(mailbox.address.clone(), Arc::new(mailbox));
        self
    }

    pub fn with_mailbox(self, address: &str) -> Self {
        self.insert(MemoryMailbox::new(address))
    }

    pub fn with_disabled_mailbox(self, address: &str) -> Self {
        let mut mailbox = MemoryMailbox::new(address);
        mailbox.disabled = true;
        self.insert(mailbox)
    }

    pub fn with_failing_mailbox(self, address: &str) -> Self {
        let mut mailbox = MemoryMailbox::new(address);
        mailbox.fail_store = true;
        self.insert(mailbox)
    }

    pub fn failing_lookups(mut self) -> Self {
        self.fail_lookups = true;
        self
    }

    pub fn get(&self, address: &str) -> Arc<MemoryMailbox> {
        let address = MailboxAddress::parse(address).unwrap();
        self.mailboxes[&address].clone()
    }
}

#[async_trait]
impl MailboxFactory for MemoryMailboxFactory {
    async fn mailbox(&self, address: &MailboxAddress) -> Result<Option<Arc<dyn Mailbox>>> {
        if self.fail_lookups {
            return Err(Error::Storage("directory unavailable".to_string()));
        }
        Ok(self
            .mailboxes
            .get(address)
            .map(|m| m.clone() as Arc<dyn Mailbox>))
    }
}

/// Codec that always fails
pub struct FailingCodec;

#[async_trait]
impl MessageCodec for FailingCodec {
    async fn decode(&self, _envelope: Envelope, _body: BodyStream) -> Result<ParsedMessage> {
        Err(Error::Parse("malformed MIME".to_string()))
    }
}

/// Shared buffer collecting formatted log output
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Capture log output of the current thread until the guard is dropped
pub fn capture_logs() -> (LogBuffer, DefaultGuard) {
    let buffer = LogBuffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish();
    (buffer, tracing::subscriber::set_default(subscriber))
}

/// A minimal well-formed message
pub fn sample_message(subject: &str) -> Vec<u8> {
    format!(
        "From: bob@x.com\r\nTo: alice@example.com\r\nSubject: {}\r\n\r\nHello Alice\r\n",
        subject
    )
    .into_bytes()
}
