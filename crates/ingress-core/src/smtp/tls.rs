//! STARTTLS acceptor built from PEM files

use ingress_common::config::TlsConfig;
use ingress_common::{Error, Result};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;
use tracing::info;

fn open_pem(path: &Path, what: &str) -> Result<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| Error::Tls(format!("Cannot open {} {}: {}", what, path.display(), e)))
}

fn load_chain(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let chain = rustls_pemfile::certs(&mut open_pem(path, "certificate chain")?)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Tls(format!("Bad certificate in {}: {}", path.display(), e)))?;

    if chain.is_empty() {
        return Err(Error::Tls(format!(
            "No certificates found in {}",
            path.display()
        )));
    }
    Ok(chain)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut open_pem(path, "private key")?)
        .map_err(|e| Error::Tls(format!("Bad private key in {}: {}", path.display(), e)))?
        .ok_or_else(|| Error::Tls(format!("No private key found in {}", path.display())))
}

/// Acceptor used for sessions that ask for STARTTLS
pub fn create_tls_acceptor(tls_config: &TlsConfig) -> Result<TlsAcceptor> {
    let chain = load_chain(&tls_config.cert_path)?;
    let key = load_key(&tls_config.key_path)?;
    let certificates = chain.len();

    let server_config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(chain, key)
        .map_err(|e| Error::Tls(format!("Certificate and key do not match: {}", e)))?;

    info!(
        cert = %tls_config.cert_path.display(),
        certificates,
        "STARTTLS certificate loaded"
    );
    Ok(TlsAcceptor::from(Arc::new(server_config)))
}
