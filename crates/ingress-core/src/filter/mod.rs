//! Filter chain engine and built-in filters

mod blocklist;
mod chain;

pub use blocklist::SenderBlocklist;
pub use chain::{Filter, FilterChain, Terminal};

use crate::event::{AcceptEvent, DeliverEvent};
use std::sync::Arc;

/// Ordered filters for both ingestion pipelines.
///
/// Registration order is execution order.
#[derive(Clone, Default)]
pub struct Filters {
    accept: Vec<Arc<dyn Filter<AcceptEvent>>>,
    deliver: Vec<Arc<dyn Filter<DeliverEvent>>>,
}

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a filter to the accept pipeline
    pub fn with_accept_filter(mut self, filter: impl Filter<AcceptEvent> + 'static) -> Self {
        self.accept.push(Arc::new(filter));
        self
    }

    /// Append a filter to the deliver pipeline
    pub fn with_deliver_filter(mut self, filter: impl Filter<DeliverEvent> + 'static) -> Self {
        self.deliver.push(Arc::new(filter));
        self
    }

    /// Append one filter instance to both pipelines
    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Filter<AcceptEvent> + Filter<DeliverEvent> + 'static,
    {
        let filter = Arc::new(filter);
        self.accept.push(filter.clone());
        self.deliver.push(filter);
        self
    }

    pub fn accept(&self) -> &[Arc<dyn Filter<AcceptEvent>>] {
        &self.accept
    }

    pub fn deliver(&self) -> &[Arc<dyn Filter<DeliverEvent>>] {
        &self.deliver
    }
}

impl std::fmt::Debug for Filters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Filters")
            .field("accept", &self.accept.len())
            .field("deliver", &self.deliver.len())
            .finish()
    }
}
