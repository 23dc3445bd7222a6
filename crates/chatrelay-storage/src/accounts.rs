//! Mailbox settings read from the mail store's directory layout

use chatrelay_common::{EmailAddress, Error, Result};
use std::path::PathBuf;
use tokio::fs;
use tracing::info;

/// Marker file whose presence lets a mailbox receive unencrypted mail
pub const ALLOW_CLEARTEXT_MARKER: &str = "allow_incoming_cleartext";

/// Per-mailbox policy lookups used by the incoming filter
pub trait AccountStore: Send + Sync {
    /// Whether `addr` accepts unencrypted incoming mail
    fn cleartext_allowed(&self, addr: &str) -> bool;
}

/// Account store over `<mailboxes_dir>/<addr>/`
#[derive(Debug, Clone)]
pub struct MaildirAccounts {
    mailboxes_dir: PathBuf,
}

impl MaildirAccounts {
    pub fn new(mailboxes_dir: impl Into<PathBuf>) -> Self {
        Self {
            mailboxes_dir: mailboxes_dir.into(),
        }
    }

    fn mailbox_dir(&self, addr: &str) -> Option<PathBuf> {
        EmailAddress::is_valid_mailbox(addr).then(|| self.mailboxes_dir.join(addr))
    }

    /// Let `addr` receive cleartext mail
    pub async fn allow_incoming_cleartext(&self, addr: &str) -> Result<()> {
        let dir = self
            .mailbox_dir(addr)
            .ok_or_else(|| Error::Validation(format!("invalid mailbox address {addr:?}")))?;
        fs::create_dir_all(&dir).await?;
        fs::write(dir.join(ALLOW_CLEARTEXT_MARKER), b"").await?;
        info!(addr = %addr, "Allowed incoming cleartext");
        Ok(())
    }

    /// Require encryption for all mail to `addr`
    pub async fn enforce_encryption(&self, addr: &str) -> Result<()> {
        let dir = self
            .mailbox_dir(addr)
            .ok_or_else(|| Error::Validation(format!("invalid mailbox address {addr:?}")))?;
        match fs::remove_file(dir.join(ALLOW_CLEARTEXT_MARKER)).await {
            Ok(()) => {
                info!(addr = %addr, "Enforcing encryption");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl AccountStore for MaildirAccounts {
    fn cleartext_allowed(&self, addr: &str) -> bool {
        self.mailbox_dir(addr)
            .map(|dir| dir.join(ALLOW_CLEARTEXT_MARKER).exists())
            .unwrap_or(false)
    }
}
