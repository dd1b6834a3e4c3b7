//! SMTP server lifecycle

use crate::codec::{MessageCodec, MimeCodec};
use crate::filter::Filters;
use crate::metrics::IngestMetrics;
use crate::pipeline::Ingestion;
use crate::resolver::MailboxResolver;
use crate::smtp::listener::{ListenerSettings, SmtpListener, TlsMode};
use crate::smtp::tls::create_tls_acceptor;
use ingress_common::config::{SmtpConfig, TlsConfig, MAX_CONNECTIONS};
use ingress_common::{Error, Result};
use ingress_storage::MailboxFactory;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

/// Lifecycle state of an [`SmtpServer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerState::Stopped => write!(f, "stopped"),
            ServerState::Starting => write!(f, "starting"),
            ServerState::Running => write!(f, "running"),
            ServerState::Stopping => write!(f, "stopping"),
        }
    }
}

/// Builder for [`SmtpServer`]
#[derive(Default)]
pub struct SmtpServerBuilder {
    config: SmtpConfig,
    tls_config: Option<TlsConfig>,
    factory: Option<Arc<dyn MailboxFactory>>,
    filters: Filters,
    codec: Option<Arc<dyn MessageCodec>>,
}

impl SmtpServerBuilder {
    pub fn with_config(mut self, config: SmtpConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_tls_config(mut self, tls_config: Option<TlsConfig>) -> Self {
        self.tls_config = tls_config;
        self
    }

    pub fn with_mailbox_factory(mut self, factory: Arc<dyn MailboxFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn with_filters(mut self, filters: Filters) -> Self {
        self.filters = filters;
        self
    }

    /// Replace the default MIME codec
    pub fn with_codec(mut self, codec: Arc<dyn MessageCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Fails with a configuration error when no mailbox factory was given
    pub fn build(self) -> Result<SmtpServer> {
        let factory = self
            .factory
            .ok_or_else(|| Error::Config("A mailbox factory is required".to_string()))?;
        let codec = self.codec.unwrap_or_else(|| Arc::new(MimeCodec::new()));
        let metrics = Arc::new(IngestMetrics::new()?);

        let ingestion = Ingestion::new(
            &self.filters,
            MailboxResolver::new(factory),
            codec,
            self.config.decode_failure_policy,
            metrics.clone(),
        );

        Ok(SmtpServer {
            config: self.config,
            tls_config: self.tls_config,
            ingestion: Arc::new(ingestion),
            metrics,
            state: ServerState::Stopped,
            running: None,
        })
    }
}

struct Running {
    shutdown: CancellationToken,
    sessions: TaskTracker,
    accept_loop: JoinHandle<()>,
    local_addr: SocketAddr,
}

/// SMTP server hosting the accept and deliver pipelines.
///
/// `start` and `stop` may alternate any number of times. Accessor changes
/// take effect on the next `start`.
pub struct SmtpServer {
    config: SmtpConfig,
    tls_config: Option<TlsConfig>,
    ingestion: Arc<Ingestion>,
    metrics: Arc<IngestMetrics>,
    state: ServerState,
    running: Option<Running>,
}

impl SmtpServer {
    pub fn builder() -> SmtpServerBuilder {
        SmtpServerBuilder::default()
    }

    fn bind_addr(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }

    /// Bind the listener and begin accepting connections
    pub async fn start(&mut self) -> Result<()> {
        let addr = self.bind_addr();
        if self.state != ServerState::Stopped {
            return Err(Error::startup(
                addr,
                Error::Internal(format!("server is already {}", self.state)),
            ));
        }

        self.state = ServerState::Starting;
        match self.launch(&addr).await {
            Ok(running) => {
                info!("SMTP server started on {}", running.local_addr);
                self.running = Some(running);
                self.state = ServerState::Running;
                Ok(())
            }
            Err(e) => {
                self.state = ServerState::Stopped;
                Err(Error::startup(addr, e))
            }
        }
    }

    async fn launch(&self, addr: &str) -> Result<Running> {
        let tls = if self.config.tls_enabled {
            info!("Creating TLS enabled server");
            let tls_config = self.tls_config.as_ref().ok_or_else(|| {
                Error::Config("TLS is enabled but no [tls] section is configured".to_string())
            })?;
            TlsMode::StartTls(create_tls_acceptor(tls_config)?)
        } else {
            info!("Creating TLS disabled server");
            TlsMode::Disabled
        };

        let settings = ListenerSettings {
            bind_addr: addr.to_string(),
            hostname: self.config.hostname.clone(),
            tls,
            proxy_protocol_v2: self.proxy_protocol_v2().unwrap_or(false),
            max_connections: MAX_CONNECTIONS,
            max_message_size: self.config.max_message_size,
            idle_timeout: Duration::from_secs(self.config.connection_timeout_secs),
        };

        let listener =
            SmtpListener::bind(settings, self.ingestion.clone(), self.metrics.clone()).await?;
        let local_addr = listener.local_addr()?;

        let shutdown = CancellationToken::new();
        let sessions = TaskTracker::new();
        let accept_loop = tokio::spawn(listener.serve(shutdown.clone(), sessions.clone()));

        Ok(Running {
            shutdown,
            sessions,
            accept_loop,
            local_addr,
        })
    }

    /// Stop accepting connections. Never fails.
    ///
    /// Open sessions are told to close at their next command. With a zero
    /// grace period in-flight deliveries are not waited for.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            debug!("Stop requested but SMTP server is not running");
            return;
        };

        self.state = ServerState::Stopping;
        running.shutdown.cancel();

        if let Err(e) = running.accept_loop.await {
            debug!("Exception stopping SMTP server: {}", e);
            self.metrics.record_shutdown_fault();
        }

        running.sessions.close();
        let grace = Duration::from_secs(self.config.shutdown_grace_secs);
        if !grace.is_zero() && timeout(grace, running.sessions.wait()).await.is_err() {
            debug!(
                "{} SMTP session(s) still open after shutdown grace period",
                running.sessions.len()
            );
            self.metrics.record_shutdown_fault();
        }

        self.state = ServerState::Stopped;
        info!("SMTP server stopped");
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    /// Address actually bound while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.local_addr)
    }

    pub fn metrics(&self) -> &Arc<IngestMetrics> {
        &self.metrics
    }

    pub fn port(&self) -> u16 {
        self.config.port
    }

    pub fn set_port(&mut self, port: u16) {
        self.config.port = port;
    }

    pub fn hostname(&self) -> Option<&str> {
        self.config.hostname.as_deref()
    }

    pub fn set_hostname(&mut self, hostname: Option<String>) {
        self.config.hostname = hostname;
    }

    pub fn tls_enabled(&self) -> bool {
        self.config.tls_enabled
    }

    pub fn set_tls_enabled(&mut self, tls_enabled: bool) {
        self.config.tls_enabled = tls_enabled;
    }

    pub fn proxy_protocol_v2(&self) -> Option<bool> {
        self.config.enable_proxy_protocol_v2
    }

    pub fn set_proxy_protocol_v2(&mut self, enabled: Option<bool>) {
        self.config.enable_proxy_protocol_v2 = enabled;
    }

    pub fn max_connections(&self) -> usize {
        MAX_CONNECTIONS
    }
}

impl Drop for SmtpServer {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            running.shutdown.cancel();
        }
    }
}
