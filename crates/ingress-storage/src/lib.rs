//! Ingress Storage - Mailbox and file storage
//!
//! This crate provides the mailbox capabilities the ingestion pipelines
//! deliver into, and the local file storage backing the default mailboxes.

pub mod file;
pub mod mailbox;

pub use file::{create_storage, FileStorage, LocalStorage};
pub use mailbox::{DirectoryMailbox, DirectoryMailboxFactory, Mailbox, MailboxFactory};
