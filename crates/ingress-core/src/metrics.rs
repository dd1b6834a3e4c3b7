//! Ingestion counters
//!
//! Faults that are deliberately swallowed (store failures, isolated decode
//! failures, shutdown faults) are counted here so they stay visible.

use ingress_common::{Error, Result};
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Outcome of one accept decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeOutcome {
    Accepted,
    Rejected,
    EmptySender,
}

impl EnvelopeOutcome {
    fn as_str(self) -> &'static str {
        match self {
            EnvelopeOutcome::Accepted => "accepted",
            EnvelopeOutcome::Rejected => "rejected",
            EnvelopeOutcome::EmptySender => "empty_sender",
        }
    }
}

/// Outcome of one delivery that reached the deliver terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Stored,
    StoreFailed,
    DecodeFailed,
    Dropped,
}

impl DeliveryOutcome {
    fn as_str(self) -> &'static str {
        match self {
            DeliveryOutcome::Stored => "stored",
            DeliveryOutcome::StoreFailed => "store_failed",
            DeliveryOutcome::DecodeFailed => "decode_failed",
            DeliveryOutcome::Dropped => "dropped",
        }
    }
}

/// Prometheus counters in a registry owned by one server
pub struct IngestMetrics {
    registry: Registry,
    envelopes: IntCounterVec,
    deliveries: IntCounterVec,
    connections_refused: IntCounter,
    shutdown_faults: IntCounter,
}

impl IngestMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let envelopes = IntCounterVec::new(
            Opts::new("ingress_envelopes_total", "Accept decisions by outcome"),
            &["outcome"],
        )
        .map_err(metrics_error)?;
        let deliveries = IntCounterVec::new(
            Opts::new("ingress_deliveries_total", "Deliveries by outcome"),
            &["outcome"],
        )
        .map_err(metrics_error)?;
        let connections_refused = IntCounter::new(
            "ingress_connections_refused_total",
            "Connections refused at the connection ceiling",
        )
        .map_err(metrics_error)?;
        let shutdown_faults = IntCounter::new(
            "ingress_shutdown_faults_total",
            "Faults ignored while stopping the server",
        )
        .map_err(metrics_error)?;

        registry
            .register(Box::new(envelopes.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(deliveries.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(connections_refused.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(shutdown_faults.clone()))
            .map_err(metrics_error)?;

        Ok(Self {
            registry,
            envelopes,
            deliveries,
            connections_refused,
            shutdown_faults,
        })
    }

    pub fn record_envelope(&self, outcome: EnvelopeOutcome) {
        self.envelopes.with_label_values(&[outcome.as_str()]).inc();
    }

    pub fn record_delivery(&self, outcome: DeliveryOutcome) {
        self.deliveries.with_label_values(&[outcome.as_str()]).inc();
    }

    pub fn record_refused_connection(&self) {
        self.connections_refused.inc();
    }

    pub fn record_shutdown_fault(&self) {
        self.shutdown_faults.inc();
    }

    pub fn envelopes(&self, outcome: EnvelopeOutcome) -> u64 {
        self.envelopes.with_label_values(&[outcome.as_str()]).get()
    }

    pub fn deliveries(&self, outcome: DeliveryOutcome) -> u64 {
        self.deliveries.with_label_values(&[outcome.as_str()]).get()
    }

    pub fn connections_refused(&self) -> u64 {
        self.connections_refused.get()
    }

    pub fn shutdown_faults(&self) -> u64 {
        self.shutdown_faults.get()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render all counters in the Prometheus text format
    pub fn encode(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(e.to_string()))
    }
}

fn metrics_error(e: prometheus::Error) -> Error {
    Error::Internal(format!("Metrics error: {}", e))
}
