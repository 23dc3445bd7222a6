//! SMTP client handing accepted mail back to the local MTA

use chatrelay_common::{Envelope, Error, Result};
use lettre::address::Envelope as SmtpEnvelope;
use lettre::transport::smtp::client::AsyncSmtpConnection;
use lettre::transport::smtp::extension::ClientId;
use lettre::Address;
use std::net::IpAddr;
use std::time::Duration;
use tracing::debug;

const REINJECT_HOST: &str = "127.0.0.1";

/// Delivers envelopes unchanged to a local SMTP port
#[derive(Debug, Clone)]
pub struct Reinjector {
    port: u16,
    source_address: Option<IpAddr>,
    timeout: Duration,
}

impl Reinjector {
    pub fn new(port: u16, timeout: Duration) -> Self {
        Self {
            port,
            source_address: None,
            timeout,
        }
    }

    /// Connect from `addr` so the receiving side can tell the origin apart
    pub fn with_source_address(mut self, addr: IpAddr) -> Self {
        self.source_address = Some(addr);
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    fn smtp_envelope(envelope: &Envelope) -> Result<SmtpEnvelope> {
        let from = if envelope.mail_from.is_empty() {
            None
        } else {
            Some(
                envelope
                    .mail_from
                    .parse::<Address>()
                    .map_err(|e| Error::Smtp(format!("Invalid sender {}: {}", envelope.mail_from, e)))?,
            )
        };

        let to = envelope
            .rcpt_to
            .iter()
            .map(|rcpt| {
                rcpt.parse::<Address>()
                    .map_err(|e| Error::Smtp(format!("Invalid recipient {}: {}", rcpt, e)))
            })
            .collect::<Result<Vec<_>>>()?;

        SmtpEnvelope::new(from, to).map_err(|e| Error::Smtp(e.to_string()))
    }

    /// Send `envelope` with its original octets, bounded by the timeout
    pub async fn send(&self, envelope: &Envelope) -> Result<()> {
        let smtp_envelope = Self::smtp_envelope(envelope)?;

        let delivery = async {
            let mut conn = AsyncSmtpConnection::connect_tokio1(
                (REINJECT_HOST, self.port),
                Some(self.timeout),
                &ClientId::Domain("localhost".to_string()),
                None,
                self.source_address,
            )
            .await
            .map_err(|e| Error::Smtp(format!("Connect failed: {}", e)))?;

            let response = conn
                .send(&smtp_envelope, &envelope.data)
                .await
                .map_err(|e| Error::Smtp(format!("Delivery failed: {}", e)))?;
            debug!(port = self.port, code = %response.code(), "Re-injected message");

            // the message is accepted once DATA completed
            let _ = conn.quit().await;
            Ok::<(), Error>(())
        };

        tokio::time::timeout(self.timeout, delivery)
            .await
            .map_err(|_| Error::Smtp(format!("Re-injection timed out after {:?}", self.timeout)))?
    }
}
