//! Ingress - mail ingestion server entry point

use anyhow::{Context, Result};
use ingress_common::config::{Config, LogFormat, LoggingConfig};
use ingress_core::{Filters, SenderBlocklist, SmtpServer};
use ingress_storage::{create_storage, DirectoryMailboxFactory};
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;

    init_logging(&config.logging);

    info!("Starting Ingress mail server...");

    // Mailboxes
    let storage = create_storage(&config.storage)?;
    let factory = DirectoryMailboxFactory::from_config(&config.mailboxes, storage)?;
    if factory.is_empty() {
        warn!("No mailboxes configured; every recipient will be rejected");
    } else {
        info!("Serving {} mailbox(es)", factory.len());
    }

    // Filters
    let blocklist = SenderBlocklist::from_config(&config.filters)?;
    let filters = if blocklist.is_empty() {
        Filters::new()
    } else {
        info!("Sender blocklist enabled");
        Filters::new().with_filter(blocklist)
    };

    let mut server = SmtpServer::builder()
        .with_config(config.smtp.clone())
        .with_tls_config(config.tls.clone())
        .with_mailbox_factory(Arc::new(factory))
        .with_filters(filters)
        .build()?;

    server.start().await?;

    info!("Ingress server started successfully");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    server.stop().await;

    match server.metrics().encode() {
        Ok(metrics) => debug!("Final counters:\n{}", metrics),
        Err(e) => warn!("Failed to encode metrics: {}", e),
    }

    info!("Ingress server shutdown complete");

    Ok(())
}

fn init_logging(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(true))
            .with(filter)
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(fmt::layer().with_target(true).with_level(true))
            .with(filter)
            .init(),
    }
}
