//! Ingress Core - mail ingestion pipelines and SMTP server
//!
//! Inbound envelopes pass through two filter pipelines: the accept pipeline
//! decides per recipient whether mail is taken, and the deliver pipeline
//! decodes the body and stores it in the resolved mailbox.

pub mod codec;
pub mod event;
pub mod filter;
pub mod metrics;
pub mod pipeline;
pub mod resolver;
pub mod smtp;

#[cfg(test)]
mod testing;

pub use codec::{MessageCodec, MimeCodec};
pub use event::{AcceptEvent, BodyStream, DeliverEvent, Event};
pub use filter::{Filter, FilterChain, Filters, SenderBlocklist, Terminal};
pub use metrics::{DeliveryOutcome, EnvelopeOutcome, IngestMetrics};
pub use pipeline::{AcceptPipeline, DeliverPipeline, Ingestion, MessageListener};
pub use resolver::MailboxResolver;
pub use smtp::{ServerState, SmtpServer, SmtpServerBuilder};
