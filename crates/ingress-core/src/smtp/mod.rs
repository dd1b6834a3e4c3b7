//! SMTP transport

mod listener;
mod proxy;
mod server;
mod session;
mod tls;

pub use listener::{ListenerSettings, SmtpListener, TlsMode};
pub use proxy::read_header as read_proxy_header;
pub use server::{ServerState, SmtpServer, SmtpServerBuilder};
pub use session::{SmtpSession, DEFAULT_HOSTNAME};
pub use tls::create_tls_acceptor;
