//! Ingress Common - Shared types and utilities
//!
//! This crate provides the configuration, error type, mailbox address and
//! decoded message types shared across all Ingress components.

pub mod config;
pub mod error;
pub mod message;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use message::{Envelope, ParsedMessage};
pub use types::{AddressFormatError, MailboxAddress};
