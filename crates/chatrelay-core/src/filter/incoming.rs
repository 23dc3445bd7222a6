//! Filter for mail arriving from other servers

use super::message::{is_cleartext_bounce, is_openpgp_encrypted, is_secure_join_handshake, ParsedMessage};
use super::{BeforeQueueFilter, SmtpReply};
use crate::smtp::Reinjector;
use async_trait::async_trait;
use chatrelay_common::{Config, Envelope};
use chatrelay_storage::AccountStore;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Rejects unencrypted mail for mailboxes that require encryption
pub struct IncomingFilter {
    accounts: Arc<dyn AccountStore>,
    reinjector: Reinjector,
}

impl IncomingFilter {
    pub fn new(config: &Config, accounts: Arc<dyn AccountStore>) -> Self {
        let reinjector = Reinjector::new(config.postfix_reinject_port_incoming, config.reinject_timeout())
            .with_source_address(config.reinject_source_address_incoming);
        Self {
            accounts,
            reinjector,
        }
    }

    pub fn with_reinjector(mut self, reinjector: Reinjector) -> Self {
        self.reinjector = reinjector;
        self
    }
}

#[async_trait]
impl BeforeQueueFilter for IncomingFilter {
    fn name(&self) -> &'static str {
        "incoming"
    }

    fn check_data(&self, envelope: &Envelope) -> Result<(), SmtpReply> {
        let message = ParsedMessage::parse(&envelope.data);

        if is_openpgp_encrypted(&message, false) || is_secure_join_handshake(&message) {
            info!(sender = %envelope.mail_from, "Incoming: accepted encrypted mail");
            return Ok(());
        }

        if is_cleartext_bounce(&message) {
            info!(sender = %envelope.mail_from, "Incoming: accepted delivery status notification");
            return Ok(());
        }

        if let Some(rcpt) = envelope
            .rcpt_to
            .iter()
            .find(|rcpt| !self.accounts.cleartext_allowed(rcpt))
        {
            warn!(sender = %envelope.mail_from, recipient = %rcpt, "Incoming: rejected unencrypted mail");
            return Err(SmtpReply::encryption_needed());
        }

        info!(sender = %envelope.mail_from, "Incoming: accepted cleartext mail");
        Ok(())
    }

    async fn reinject(&self, envelope: &Envelope) -> Result<(), SmtpReply> {
        self.reinjector.send(envelope).await.map_err(|e| {
            error!(port = self.reinjector.port(), "Failed to re-inject incoming mail: {}", e);
            SmtpReply::temporary_failure("4.3.0 Re-injection failed, try again later")
        })
    }
}
