//! Error types for Ingress

use crate::types::AddressFormatError;
use thiserror::Error;

/// Main error type for Ingress
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to start SMTP server on {addr}: {source}")]
    Startup {
        addr: String,
        #[source]
        source: Box<Error>,
    },

    #[error(transparent)]
    Address(#[from] AddressFormatError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Message parse error: {0}")]
    Parse(String),

    #[error("Filter error: {0}")]
    Filter(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for Ingress
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Wrap a lower-level failure as a startup error for `addr`
    pub fn startup(addr: impl Into<String>, source: Error) -> Self {
        Error::Startup {
            addr: addr.into(),
            source: Box::new(source),
        }
    }

    /// Returns the SMTP reply (code and enhanced status text) a session
    /// should send when this error escapes a pipeline
    pub fn smtp_reply(&self) -> (u16, &'static str) {
        match self {
            Error::Address(_) => (501, "5.1.3 Bad address syntax"),
            Error::Parse(_) => (554, "5.6.0 Message could not be parsed"),
            Error::Filter(_) => (451, "4.7.1 Rejected by local policy"),
            Error::Config(_)
            | Error::Startup { .. }
            | Error::Storage(_)
            | Error::Tls(_)
            | Error::Internal(_)
            | Error::Io(_)
            | Error::Other(_) => (451, "4.3.0 Temporary local error"),
        }
    }

    /// Returns the error code string
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) => "CONFIG_ERROR",
            Error::Startup { .. } => "STARTUP_ERROR",
            Error::Address(_) => "ADDRESS_FORMAT_ERROR",
            Error::Storage(_) => "STORAGE_ERROR",
            Error::Parse(_) => "PARSE_ERROR",
            Error::Filter(_) => "FILTER_ERROR",
            Error::Tls(_) => "TLS_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
            Error::Io(_) => "IO_ERROR",
            Error::Other(_) => "INTERNAL_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_smtp_reply_mapping() {
        let err = Error::Address(AddressFormatError::new("nobody"));
        assert_eq!(err.smtp_reply().0, 501);

        let err = Error::Parse("truncated headers".to_string());
        assert_eq!(err.smtp_reply(), (554, "5.6.0 Message could not be parsed"));

        let err = Error::Storage("disk full".to_string());
        assert_eq!(err.smtp_reply().0, 451);
    }

    #[test]
    fn test_startup_wraps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::AddrInUse, "address in use");
        let err = Error::startup("0.0.0.0:25", Error::Io(io));

        assert_eq!(err.code(), "STARTUP_ERROR");
        assert!(err.to_string().contains("0.0.0.0:25"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
