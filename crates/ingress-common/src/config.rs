//! Configuration for Ingress

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Hard ceiling on concurrent SMTP connections. Not configurable.
pub const MAX_CONNECTIONS: usize = 30_000;

/// Environment variable naming an explicit configuration file
pub const CONFIG_ENV: &str = "INGRESS_CONFIG";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// SMTP listener configuration
    #[serde(default)]
    pub smtp: SmtpConfig,

    /// TLS configuration (required when `smtp.tls_enabled` is set)
    pub tls: Option<TlsConfig>,

    /// Storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Envelope filters
    #[serde(default)]
    pub filters: FilterConfig,

    /// Known local mailboxes
    #[serde(default)]
    pub mailboxes: Vec<MailboxConfig>,
}

/// SMTP configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    /// Name advertised in the greeting; the transport default is used when unset
    pub hostname: Option<String>,

    /// Bind host
    #[serde(default = "default_smtp_host")]
    pub host: String,

    /// SMTP port (inbound)
    #[serde(default = "default_smtp_port")]
    pub port: u16,

    /// Offer STARTTLS
    #[serde(default)]
    pub tls_enabled: bool,

    /// Expect a PROXY protocol v2 header on every connection.
    /// `None` leaves the transport default (off).
    pub enable_proxy_protocol_v2: Option<bool>,

    /// Maximum message size in bytes
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Idle timeout per command, in seconds
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,

    /// What to do when a message body cannot be decoded
    #[serde(default)]
    pub decode_failure_policy: DecodeFailurePolicy,

    /// How long `stop()` waits for in-flight sessions; 0 disables draining
    #[serde(default)]
    pub shutdown_grace_secs: u64,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            hostname: None,
            host: default_smtp_host(),
            port: default_smtp_port(),
            tls_enabled: false,
            enable_proxy_protocol_v2: None,
            max_message_size: default_max_message_size(),
            connection_timeout_secs: default_connection_timeout(),
            decode_failure_policy: DecodeFailurePolicy::default(),
            shutdown_grace_secs: 0,
        }
    }
}

fn default_smtp_host() -> String {
    "0.0.0.0".to_string()
}

fn default_smtp_port() -> u16 {
    25
}

fn default_max_message_size() -> usize {
    25 * 1024 * 1024 // 25 MB
}

fn default_connection_timeout() -> u64 {
    300
}

/// Handling of message bodies that fail to decode during delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeFailurePolicy {
    /// Return the fault to the transport, which rejects the DATA command
    #[default]
    Propagate,
    /// Log and count the fault, then acknowledge the message as delivered
    Isolate,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Storage backend: "fs"
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// Base path for local filesystem storage
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            path: default_storage_path(),
        }
    }
}

fn default_storage_backend() -> String {
    "fs".to_string()
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("/var/lib/ingress/mail")
}

/// Log output: human readable lines or one JSON object per event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// `[logging]` section. `RUST_LOG` overrides `level` when set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `info,ingress_core=debug`
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// TLS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Path to certificate file
    pub cert_path: PathBuf,

    /// Path to private key file
    pub key_path: PathBuf,
}

/// Filter configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Envelope senders that are always refused
    #[serde(default)]
    pub blocked_senders: Vec<String>,

    /// Sender domains that are always refused
    #[serde(default)]
    pub blocked_domains: Vec<String>,
}

/// A local mailbox
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailboxConfig {
    /// Mailbox address (`local@domain`)
    pub address: String,

    /// Refuse new mail for this mailbox
    #[serde(default)]
    pub disabled: bool,
}

impl Config {
    /// Read, parse and validate a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Cannot read {}: {}", path.display(), e))
        })?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Invalid {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `$INGRESS_CONFIG`, else the first of `./config.toml` and
    /// `/etc/ingress/config.toml` that exists
    pub fn load() -> Result<Self> {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Self::from_file(Path::new(&path));
        }

        ["./config.toml", "/etc/ingress/config.toml"]
            .iter()
            .map(Path::new)
            .find(|path| path.exists())
            .ok_or_else(|| {
                Error::Config(format!(
                    "No configuration file found (set {} or create ./config.toml)",
                    CONFIG_ENV
                ))
            })
            .and_then(Self::from_file)
    }

    /// Reject combinations the server cannot start with
    pub fn validate(&self) -> Result<()> {
        if self.smtp.tls_enabled && self.tls.is_none() {
            return Err(Error::Config(
                "smtp.tls_enabled is set but the [tls] section is missing".to_string(),
            ));
        }
        if self.smtp.max_message_size == 0 {
            return Err(Error::Config(
                "smtp.max_message_size must be greater than zero".to_string(),
            ));
        }
        if self.smtp.connection_timeout_secs == 0 {
            return Err(Error::Config(
                "smtp.connection_timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let smtp = SmtpConfig::default();
        assert_eq!(smtp.port, 25);
        assert_eq!(smtp.hostname, None);
        assert!(!smtp.tls_enabled);
        assert_eq!(smtp.enable_proxy_protocol_v2, None);
        assert_eq!(smtp.decode_failure_policy, DecodeFailurePolicy::Propagate);
        assert_eq!(smtp.shutdown_grace_secs, 0);
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[smtp]
hostname = "mx.example.com"
port = 2525
enable_proxy_protocol_v2 = true
decode_failure_policy = "isolate"

[storage]
path = "/data/mail"

[filters]
blocked_domains = ["spam.example"]

[[mailboxes]]
address = "alice@example.com"

[[mailboxes]]
address = "old@example.com"
disabled = true
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.smtp.hostname.as_deref(), Some("mx.example.com"));
        assert_eq!(config.smtp.port, 2525);
        assert_eq!(config.smtp.host, "0.0.0.0");
        assert_eq!(config.smtp.enable_proxy_protocol_v2, Some(true));
        assert_eq!(config.smtp.decode_failure_policy, DecodeFailurePolicy::Isolate);
        assert_eq!(config.storage.backend, "fs");
        assert_eq!(config.filters.blocked_domains, vec!["spam.example".to_string()]);
        assert_eq!(config.mailboxes.len(), 2);
        assert!(!config.mailboxes[0].disabled);
        assert!(config.mailboxes[1].disabled);
        assert!(config.tls.is_none());
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.smtp.port, 25);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Text);
        assert!(config.mailboxes.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_tls_without_certificates() {
        let config: Config = toml::from_str("[smtp]\ntls_enabled = true\n").unwrap();
        let err = config.validate().unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }

    #[test]
    fn test_from_file() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[logging]\nformat = \"json\"\n\n[smtp]\nport = 2525").unwrap();
        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.smtp.port, 2525);
        assert_eq!(config.logging.format, LogFormat::Json);

        let err = Config::from_file(Path::new("/nonexistent/ingress.toml")).unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }
}
