//! Common types for chatrelay

/// Email address
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EmailAddress {
    pub local: String,
    pub domain: String,
}

impl EmailAddress {
    /// Create a new email address
    pub fn new(local: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            domain: domain.into(),
        }
    }

    /// Parse an address containing exactly one `@` with non-empty sides
    pub fn parse(s: &str) -> Option<Self> {
        let (local, domain) = s.split_once('@')?;
        if local.is_empty() || domain.is_empty() || domain.contains('@') {
            return None;
        }
        Some(Self::new(local, domain))
    }

    /// Whether the address can safely name a mailbox directory
    pub fn is_valid_mailbox(s: &str) -> bool {
        Self::parse(s).is_some() && !s.contains('/') && !s.contains("..") && !s.contains('\0')
    }
}

/// One SMTP transaction: sender, recipients and the raw message octets
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    /// Sender (MAIL FROM)
    pub mail_from: String,

    /// Recipients (RCPT TO), in the order they were given
    pub rcpt_to: Vec<String>,

    /// Message content after dot-unstuffing, byte-exact
    pub data: Vec<u8>,
}

impl Envelope {
    pub fn new(mail_from: impl Into<String>, rcpt_to: Vec<String>, data: Vec<u8>) -> Self {
        Self {
            mail_from: mail_from.into(),
            rcpt_to,
            data,
        }
    }

    /// Clear the transaction so the session can start a new one
    pub fn reset(&mut self) {
        self.mail_from.clear();
        self.rcpt_to.clear();
        self.data.clear();
    }
}
