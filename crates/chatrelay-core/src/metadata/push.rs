//! Push notification gateway client

use async_trait::async_trait;
use chatrelay_common::{Config, Error, Result};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, warn};

/// Result of waking one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Delivered,
    /// The gateway no longer knows the token
    InvalidToken,
    /// Worth retrying later
    Transient(String),
}

/// Wakes devices through an external push service
#[async_trait]
pub trait PushGateway: Send + Sync {
    async fn notify(&self, token: &str) -> PushOutcome;
}

/// Posts raw device tokens to an HTTP notification endpoint
pub struct HttpPushGateway {
    client: Client,
    url: String,
}

impl HttpPushGateway {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Push(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn with_config(config: &Config) -> Result<Self> {
        Self::new(config.push_notification_url.clone(), config.push_timeout())
    }
}

#[async_trait]
impl PushGateway for HttpPushGateway {
    async fn notify(&self, token: &str) -> PushOutcome {
        let response = match self.client.post(&self.url).body(token.to_string()).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(url = %self.url, "Push request failed: {}", e);
                return PushOutcome::Transient(e.to_string());
            }
        };

        let status = response.status();
        if status.is_success() {
            debug!("Push notification delivered");
            PushOutcome::Delivered
        } else if status == StatusCode::GONE {
            PushOutcome::InvalidToken
        } else {
            warn!(status = %status, "Push gateway refused notification");
            PushOutcome::Transient(format!("gateway returned {}", status))
        }
    }
}
