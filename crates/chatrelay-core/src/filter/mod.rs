//! Encrypted-or-reject mail filtering
//!
//! Both filter directions implement [`BeforeQueueFilter`]; the SMTP session
//! drives whichever one the process was started with.

pub mod armor;
pub mod incoming;
pub mod message;
pub mod openpgp;
pub mod outgoing;
pub mod rate_limiter;

#[cfg(test)]
pub(crate) mod testdata;

pub use armor::{decode_armored, is_valid_armored_payload};
pub use incoming::IncomingFilter;
pub use message::{is_cleartext_bounce, is_openpgp_encrypted, is_secure_join_handshake, ParsedMessage};
pub use openpgp::is_valid_openpgp_ciphertext;
pub use outgoing::OutgoingFilter;
pub use rate_limiter::RateLimiter;

use async_trait::async_trait;
use chatrelay_common::Envelope;
use std::fmt;

/// Rejection text for unencrypted mail
pub const ENCRYPTION_NEEDED_MESSAGE: &str = "Encryption Needed: Invalid Unencrypted Mail";

/// An SMTP status line sent back to the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpReply {
    pub code: u16,
    pub message: String,
}

impl SmtpReply {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// 523, the policy rejection for mail that should have been encrypted
    pub fn encryption_needed() -> Self {
        Self::new(523, ENCRYPTION_NEEDED_MESSAGE)
    }

    /// 451, asks the client to retry later
    pub fn temporary_failure(message: impl Into<String>) -> Self {
        Self::new(451, message)
    }
}

impl fmt::Display for SmtpReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.message)
    }
}

/// Policy applied by an SMTP listener before mail enters the queue
#[async_trait]
pub trait BeforeQueueFilter: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Check the envelope sender of a new transaction
    fn check_mail(&self, _mail_from: &str) -> Result<(), SmtpReply> {
        Ok(())
    }

    /// Decide whether a complete transaction may pass
    fn check_data(&self, envelope: &Envelope) -> Result<(), SmtpReply>;

    /// Hand an accepted transaction to the trusted pipeline
    async fn reinject(&self, envelope: &Envelope) -> Result<(), SmtpReply>;
}

/// Exact address or `@domain` suffix match against the passthrough list
pub fn recipient_matches_passthrough(recipient: &str, passthrough_recipients: &[String]) -> bool {
    passthrough_recipients.iter().any(|addr| {
        recipient == addr || (addr.starts_with('@') && recipient.ends_with(addr.as_str()))
    })
}
