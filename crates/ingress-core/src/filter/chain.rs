//! Ordered filter pipeline with a fixed terminal action

use crate::event::Event;
use async_trait::async_trait;
use ingress_common::Result;
use std::sync::Arc;

/// A pluggable policy step.
///
/// A filter receives the event and the rest of the chain. Calling
/// [`FilterChain::proceed`] hands the event to the next filter (or the
/// terminal); returning without calling it aborts the pipeline and leaves the
/// event with whatever outcome it currently holds.
#[async_trait]
pub trait Filter<E: Event>: Send + Sync {
    async fn process(&self, event: &mut E, chain: FilterChain<'_, E>) -> Result<()>;
}

/// The fixed last step of a pipeline, reached only when no filter aborts
#[async_trait]
pub trait Terminal<E: Event>: Send + Sync {
    async fn execute(&self, event: &mut E) -> Result<()>;
}

/// Cursor over a filter list, built fresh for every event.
///
/// `proceed` consumes the chain, so each filter can continue at most once and
/// the terminal runs at most once.
pub struct FilterChain<'a, E: Event> {
    filters: &'a [Arc<dyn Filter<E>>],
    terminal: &'a dyn Terminal<E>,
    cursor: usize,
}

impl<'a, E: Event> FilterChain<'a, E> {
    pub fn new(filters: &'a [Arc<dyn Filter<E>>], terminal: &'a dyn Terminal<E>) -> Self {
        Self {
            filters,
            terminal,
            cursor: 0,
        }
    }

    /// Run the next filter, or the terminal when all filters have run
    pub async fn proceed(mut self, event: &mut E) -> Result<()> {
        let filters = self.filters;
        match filters.get(self.cursor) {
            Some(filter) => {
                self.cursor += 1;
                filter.process(event, self).await
            }
            None => self.terminal.execute(event).await,
        }
    }

    /// Filters not yet invoked
    pub fn remaining(&self) -> usize {
        self.filters.len() - self.cursor
    }
}
