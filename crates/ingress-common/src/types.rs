//! Common types for Ingress

use thiserror::Error;

/// Raised when a string does not have the `local@domain` structure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid mailbox address: {raw:?}")]
pub struct AddressFormatError {
    raw: String,
}

impl AddressFormatError {
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }

    /// The input that failed to parse
    pub fn raw(&self) -> &str {
        &self.raw
    }
}

/// Structured mailbox address (local part + domain)
///
/// Both parts are non-empty. The domain is stored lowercased so that two
/// spellings of the same domain compare equal; the local part is kept as given.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MailboxAddress {
    local: String,
    domain: String,
}

impl MailboxAddress {
    /// Create an address from already separated parts
    pub fn new(local: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            domain: domain.into().to_ascii_lowercase(),
        }
    }

    /// Parse `local@domain`, `<local@domain>` or `Name <local@domain>`
    pub fn parse(raw: &str) -> Result<Self, AddressFormatError> {
        let trimmed = raw.trim();

        let addr = match (trimmed.rfind('<'), trimmed.ends_with('>')) {
            (Some(start), true) => &trimmed[start + 1..trimmed.len() - 1],
            (None, false) => trimmed,
            _ => return Err(AddressFormatError::new(raw)),
        };

        if addr
            .chars()
            .any(|c| c.is_whitespace() || c == '<' || c == '>')
        {
            return Err(AddressFormatError::new(raw));
        }

        match addr.rsplit_once('@') {
            Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {
                Ok(Self::new(local, domain))
            }
            _ => Err(AddressFormatError::new(raw)),
        }
    }

    pub fn local(&self) -> &str {
        &self.local
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }
}

impl std::fmt::Display for MailboxAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.local, self.domain)
    }
}

impl std::str::FromStr for MailboxAddress {
    type Err = AddressFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_mailbox_address_parse() {
        let addr = MailboxAddress::parse("alice@example.com").unwrap();
        assert_eq!(addr.local(), "alice");
        assert_eq!(addr.domain(), "example.com");
        assert_eq!(addr.to_string(), "alice@example.com");
    }

    #[test]
    fn test_mailbox_address_parse_bracketed() {
        let expected = MailboxAddress::new("alice", "example.com");
        assert_eq!(MailboxAddress::parse("<alice@example.com>").unwrap(), expected);
        assert_eq!(
            MailboxAddress::parse("Alice Liddell <alice@Example.COM>").unwrap(),
            expected
        );
        assert_eq!("  alice@example.com ".parse::<MailboxAddress>().unwrap(), expected);
    }

    #[test]
    fn test_mailbox_address_splits_at_last_at() {
        let addr = MailboxAddress::parse("\"odd@local\"@example.com").unwrap();
        assert_eq!(addr.local(), "\"odd@local\"");
        assert_eq!(addr.domain(), "example.com");
    }

    #[test]
    fn test_mailbox_address_invalid() {
        for raw in [
            "",
            "invalid",
            "@example.com",
            "user@",
            "<>",
            "<user@example.com",
            "user name@example.com",
            "a@b>",
        ] {
            let err = MailboxAddress::parse(raw).unwrap_err();
            assert_eq!(err.raw(), raw);
        }
    }

    #[test]
    fn test_mailbox_address_parse_is_deterministic() {
        let first = MailboxAddress::parse("bob@x.com");
        let second = MailboxAddress::parse("bob@x.com");
        assert_eq!(first, second);
    }
}
