//! TCP accept loop

use crate::metrics::IngestMetrics;
use crate::pipeline::MessageListener;
use crate::smtp::proxy;
use crate::smtp::session::SmtpSession;
use ingress_common::Result;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Pause after a failed accept, e.g. when out of file descriptors
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Listener variant: plain only, or plain with STARTTLS upgrade
#[derive(Clone)]
pub enum TlsMode {
    Disabled,
    StartTls(TlsAcceptor),
}

impl TlsMode {
    pub fn acceptor(&self) -> Option<&TlsAcceptor> {
        match self {
            TlsMode::Disabled => None,
            TlsMode::StartTls(acceptor) => Some(acceptor),
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, TlsMode::StartTls(_))
    }
}

impl fmt::Debug for TlsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TlsMode::Disabled => write!(f, "Disabled"),
            TlsMode::StartTls(_) => write!(f, "StartTls"),
        }
    }
}

/// Settings fixed for the lifetime of one listener
#[derive(Debug, Clone)]
pub struct ListenerSettings {
    pub bind_addr: String,
    pub hostname: Option<String>,
    pub tls: TlsMode,
    pub proxy_protocol_v2: bool,
    pub max_connections: usize,
    pub max_message_size: usize,
    pub idle_timeout: Duration,
}

/// Bound SMTP listener
pub struct SmtpListener {
    listener: TcpListener,
    settings: Arc<ListenerSettings>,
    handler: Arc<dyn MessageListener>,
    metrics: Arc<IngestMetrics>,
    connection_semaphore: Arc<Semaphore>,
}

impl SmtpListener {
    pub async fn bind(
        settings: ListenerSettings,
        handler: Arc<dyn MessageListener>,
        metrics: Arc<IngestMetrics>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(&settings.bind_addr).await?;
        Ok(Self {
            listener,
            connection_semaphore: Arc::new(Semaphore::new(settings.max_connections)),
            settings: Arc::new(settings),
            handler,
            metrics,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` fires.
    ///
    /// Sessions are spawned on `sessions` so the owner can wait for them.
    pub async fn serve(self, shutdown: CancellationToken, sessions: TaskTracker) {
        let tls_status = if self.settings.tls.is_enabled() {
            "STARTTLS enabled"
        } else {
            "STARTTLS disabled"
        };
        match self.listener.local_addr() {
            Ok(addr) => info!("SMTP server listening on {} ({})", addr, tls_status),
            Err(_) => info!("SMTP server listening on {} ({})", self.settings.bind_addr, tls_status),
        }

        loop {
            let accepted = tokio::select! {
                accepted = self.listener.accept() => Some(accepted),
                _ = shutdown.cancelled() => None,
            };
            let Some(accepted) = accepted else {
                info!("SMTP listener shutting down");
                break;
            };

            match accepted {
                Ok((stream, peer_addr)) => {
                    let permit = match self.connection_semaphore.clone().try_acquire_owned() {
                        Ok(permit) => permit,
                        Err(_) => {
                            warn!("Max connections reached, rejecting {}", peer_addr);
                            self.metrics.record_refused_connection();
                            tokio::spawn(refuse(stream));
                            continue;
                        }
                    };

                    let settings = self.settings.clone();
                    let handler = self.handler.clone();
                    let shutdown = shutdown.clone();

                    sessions.spawn(async move {
                        if let Err(e) =
                            serve_connection(stream, peer_addr, settings, handler, shutdown).await
                        {
                            warn!("SMTP session error from {}: {}", peer_addr, e);
                        }
                        drop(permit);
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    tokio::select! {
                        _ = tokio::time::sleep(ACCEPT_BACKOFF) => {}
                        _ = shutdown.cancelled() => {}
                    }
                }
            }
        }
    }
}

/// Tell a client over the connection ceiling to come back later
async fn refuse(mut stream: TcpStream) {
    let reply = b"421 4.3.2 Too many connections, try again later\r\n";
    if let Err(e) = stream.write_all(reply).await {
        debug!("Failed to send refusal: {}", e);
    }
    let _ = stream.shutdown().await;
}

async fn serve_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    settings: Arc<ListenerSettings>,
    handler: Arc<dyn MessageListener>,
    shutdown: CancellationToken,
) -> Result<()> {
    let peer_addr = if settings.proxy_protocol_v2 {
        let header = timeout(settings.idle_timeout, proxy::read_header(&mut stream))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "no PROXY header received"))??;
        match header {
            Some(source) => {
                debug!("PROXY header from {}: client is {}", peer_addr, source);
                source
            }
            None => peer_addr,
        }
    } else {
        peer_addr
    };

    debug!("Accepted SMTP connection from {}", peer_addr);
    SmtpSession::new(settings, handler, peer_addr, shutdown)
        .handle(stream)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::BodyStream;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use tokio::io::{AsyncBufReadExt, BufReader};

    struct RejectAll;

    #[async_trait]
    impl MessageListener for RejectAll {
        async fn accept(&self, _sender: &str, _recipient: &str) -> Result<bool> {
            Ok(false)
        }

        async fn deliver(&self, _sender: &str, _recipient: &str, _body: BodyStream) -> Result<()> {
            Ok(())
        }
    }

    async fn first_line(stream: &mut BufReader<TcpStream>) -> String {
        let mut line = String::new();
        stream.read_line(&mut line).await.unwrap();
        line.trim_end().to_string()
    }

    #[tokio::test]
    async fn test_connections_over_ceiling_are_refused() {
        let metrics = Arc::new(IngestMetrics::new().unwrap());
        let settings = ListenerSettings {
            bind_addr: "127.0.0.1:0".to_string(),
            hostname: None,
            tls: TlsMode::Disabled,
            proxy_protocol_v2: false,
            max_connections: 1,
            max_message_size: 1024,
            idle_timeout: Duration::from_secs(30),
        };
        let listener = SmtpListener::bind(settings, Arc::new(RejectAll), metrics.clone())
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let sessions = TaskTracker::new();
        let serving = tokio::spawn(listener.serve(shutdown.clone(), sessions.clone()));

        let mut held = BufReader::new(TcpStream::connect(addr).await.unwrap());
        assert!(first_line(&mut held).await.starts_with("220 localhost"));

        let mut extra = BufReader::new(TcpStream::connect(addr).await.unwrap());
        assert_eq!(
            first_line(&mut extra).await,
            "421 4.3.2 Too many connections, try again later"
        );
        assert_eq!(metrics.connections_refused(), 1);

        shutdown.cancel();
        serving.await.unwrap();
        sessions.close();
        sessions.wait().await;
        assert!(first_line(&mut held).await.starts_with("421"));
    }
}
