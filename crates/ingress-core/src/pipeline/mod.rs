//! Accept and deliver pipelines behind the transport callbacks

mod accept;
mod deliver;

pub use accept::AcceptPipeline;
pub use deliver::{DeliverPipeline, SUBJECT_PLACEHOLDER};

use crate::codec::MessageCodec;
use crate::event::BodyStream;
use crate::filter::Filters;
use crate::metrics::IngestMetrics;
use crate::resolver::MailboxResolver;
use async_trait::async_trait;
use ingress_common::config::DecodeFailurePolicy;
use ingress_common::Result;
use std::sync::Arc;

/// Callbacks the SMTP transport invokes for every envelope.
///
/// `accept` runs once per RCPT before the body is transferred; `deliver`
/// runs once per accepted recipient after DATA completes. Errors are mapped
/// to SMTP replies by the transport.
#[async_trait]
pub trait MessageListener: Send + Sync {
    async fn accept(&self, sender: &str, recipient: &str) -> Result<bool>;

    async fn deliver(&self, sender: &str, recipient: &str, body: BodyStream) -> Result<()>;
}

/// Both pipelines wired to one resolver
pub struct Ingestion {
    accept: AcceptPipeline,
    deliver: DeliverPipeline,
}

impl Ingestion {
    pub fn new(
        filters: &Filters,
        resolver: MailboxResolver,
        codec: Arc<dyn MessageCodec>,
        decode_failure_policy: DecodeFailurePolicy,
        metrics: Arc<IngestMetrics>,
    ) -> Self {
        Self {
            accept: AcceptPipeline::new(
                filters.accept().to_vec(),
                resolver.clone(),
                metrics.clone(),
            ),
            deliver: DeliverPipeline::new(
                filters.deliver().to_vec(),
                resolver,
                codec,
                decode_failure_policy,
                metrics,
            ),
        }
    }
}

#[async_trait]
impl MessageListener for Ingestion {
    async fn accept(&self, sender: &str, recipient: &str) -> Result<bool> {
        self.accept.accept(sender, recipient).await
    }

    async fn deliver(&self, sender: &str, recipient: &str, body: BodyStream) -> Result<()> {
        self.deliver.deliver(sender, recipient, body).await
    }
}
