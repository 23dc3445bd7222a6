//! Filter for mail submitted by local users

use super::message::{is_openpgp_encrypted, is_secure_join_handshake, ParsedMessage};
use super::rate_limiter::RateLimiter;
use super::{recipient_matches_passthrough, BeforeQueueFilter, SmtpReply};
use crate::smtp::Reinjector;
use async_trait::async_trait;
use chatrelay_common::{Clock, Config, Envelope};
use std::sync::Arc;
use tracing::{error, info, warn};

const AUTOCRYPT_SETUP_SUBJECT: &str = "Autocrypt Setup Message";

/// Rejects unencrypted mail leaving the relay
pub struct OutgoingFilter {
    max_user_send_per_minute: u32,
    passthrough_senders: Vec<String>,
    passthrough_recipients: Vec<String>,
    rate_limiter: RateLimiter,
    reinjector: Reinjector,
}

impl OutgoingFilter {
    pub fn new(config: &Config, clock: Arc<dyn Clock>) -> Self {
        Self {
            max_user_send_per_minute: config.max_user_send_per_minute,
            passthrough_senders: config.passthrough_senders.clone(),
            passthrough_recipients: config.passthrough_recipients.clone(),
            rate_limiter: RateLimiter::new(clock),
            reinjector: Reinjector::new(config.postfix_reinject_port, config.reinject_timeout()),
        }
    }

    pub fn with_reinjector(mut self, reinjector: Reinjector) -> Self {
        self.reinjector = reinjector;
        self
    }

    fn is_autocrypt_setup_message(envelope: &Envelope, message: &ParsedMessage) -> bool {
        matches!(envelope.rcpt_to.as_slice(), [rcpt] if rcpt.eq_ignore_ascii_case(&envelope.mail_from))
            && message.subject.as_deref() == Some(AUTOCRYPT_SETUP_SUBJECT)
            && message.content_type == "multipart/mixed"
    }
}

#[async_trait]
impl BeforeQueueFilter for OutgoingFilter {
    fn name(&self) -> &'static str {
        "outgoing"
    }

    fn check_mail(&self, mail_from: &str) -> Result<(), SmtpReply> {
        if mail_from.split('@').count() != 2 {
            return Err(SmtpReply::new(500, format!("Invalid from address <{mail_from}>")));
        }

        if !self.rate_limiter.allowed(mail_from, self.max_user_send_per_minute) {
            warn!(sender = %mail_from, "Rate limit exceeded");
            return Err(SmtpReply::new(450, format!("4.7.1: Too much mail from {mail_from}")));
        }
        self.rate_limiter.retain_recent();

        Ok(())
    }

    fn check_data(&self, envelope: &Envelope) -> Result<(), SmtpReply> {
        let message = ParsedMessage::parse(&envelope.data);
        let from_addr = message.from.as_deref().unwrap_or_default();

        if !envelope.mail_from.eq_ignore_ascii_case(from_addr) {
            warn!(sender = %envelope.mail_from, from = %from_addr, "Rejected forged From header");
            return Err(SmtpReply::new(
                500,
                format!("Invalid FROM <{from_addr}> for <{}>", envelope.mail_from),
            ));
        }

        if is_openpgp_encrypted(&message, true) || is_secure_join_handshake(&message) {
            info!(sender = %envelope.mail_from, "Outgoing: accepted encrypted mail");
            return Ok(());
        }

        if self.passthrough_senders.contains(&envelope.mail_from) {
            info!(sender = %envelope.mail_from, "Outgoing: accepted cleartext from passthrough sender");
            return Ok(());
        }

        if Self::is_autocrypt_setup_message(envelope, &message) {
            info!(sender = %envelope.mail_from, "Outgoing: accepted Autocrypt Setup Message");
            return Ok(());
        }

        if let Some(rcpt) = envelope
            .rcpt_to
            .iter()
            .find(|rcpt| !recipient_matches_passthrough(rcpt, &self.passthrough_recipients))
        {
            warn!(sender = %envelope.mail_from, recipient = %rcpt, "Outgoing: rejected unencrypted mail");
            return Err(SmtpReply::encryption_needed());
        }

        info!(sender = %envelope.mail_from, "Outgoing: accepted cleartext to passthrough recipients");
        Ok(())
    }

    async fn reinject(&self, envelope: &Envelope) -> Result<(), SmtpReply> {
        self.reinjector.send(envelope).await.map_err(|e| {
            error!(port = self.reinjector.port(), "Failed to re-inject outgoing mail: {}", e);
            SmtpReply::temporary_failure("4.3.0 Re-injection failed, try again later")
        })
    }
}
