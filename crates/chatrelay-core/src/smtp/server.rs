//! SMTP server implementation

use crate::filter::BeforeQueueFilter;
use crate::smtp::{SessionSettings, SmtpHandler};
use anyhow::Result;
use chatrelay_common::Config;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

/// Filter listener accepting SMTP connections from the local MTA
pub struct SmtpServer {
    settings: SessionSettings,
    filter: Arc<dyn BeforeQueueFilter>,
    connection_semaphore: Arc<Semaphore>,
}

impl SmtpServer {
    /// Create a new SMTP server
    pub fn new(settings: SessionSettings, filter: Arc<dyn BeforeQueueFilter>, max_connections: usize) -> Self {
        Self {
            settings,
            filter,
            connection_semaphore: Arc::new(Semaphore::new(max_connections)),
        }
    }

    /// Create a server with the limits from the relay configuration
    pub fn with_config(config: &Config, filter: Arc<dyn BeforeQueueFilter>) -> Self {
        let settings = SessionSettings {
            hostname: config.mail_domain.clone(),
            max_message_size: config.max_message_size,
            idle_timeout: config.smtp_session_timeout(),
        };
        Self::new(settings, filter, config.max_smtp_connections)
    }

    /// Bind to `addr` and serve until `shutdown` is cancelled
    pub async fn run(&self, addr: SocketAddr, shutdown: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Accept connections on an already bound listener. Sessions still open
    /// at shutdown run to completion before this returns.
    pub async fn serve(&self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let sessions = TaskTracker::new();
        info!(
            filter = self.filter.name(),
            "SMTP filter listening on {}",
            listener.local_addr()?
        );

        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer_addr)) => {
                    // Acquire semaphore permit
                    let permit = match self.connection_semaphore.clone().try_acquire_owned() {
                        Ok(permit) => permit,
                        Err(_) => {
                            warn!("Max connections reached, rejecting {}", peer_addr);
                            continue;
                        }
                    };

                    let handler = SmtpHandler::new(self.settings.clone(), self.filter.clone(), peer_addr);

                    sessions.spawn(async move {
                        if let Err(e) = handler.handle(stream).await {
                            error!("SMTP session error from {}: {}", peer_addr, e);
                        }
                        drop(permit);
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }

        info!(filter = self.filter.name(), "SMTP filter shutting down");
        sessions.close();
        sessions.wait().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::testdata::{encrypted_message, plain_message};
    use crate::filter::{OutgoingFilter, SmtpReply};
    use crate::smtp::Reinjector;
    use async_trait::async_trait;
    use chatrelay_common::{Envelope, Error, MockClock};
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Stands in for the trusted MTA behind the filter
    #[derive(Default)]
    struct Sink {
        received: Mutex<Vec<Envelope>>,
    }

    #[async_trait]
    impl BeforeQueueFilter for Sink {
        fn name(&self) -> &'static str {
            "sink"
        }

        fn check_data(&self, _envelope: &Envelope) -> Result<(), SmtpReply> {
            Ok(())
        }

        async fn reinject(&self, envelope: &Envelope) -> Result<(), SmtpReply> {
            self.received.lock().unwrap().push(envelope.clone());
            Ok(())
        }
    }

    async fn spawn_server(filter: Arc<dyn BeforeQueueFilter>, shutdown: CancellationToken) -> u16 {
        let settings = SessionSettings {
            hostname: "chatmail.example.org".to_string(),
            max_message_size: 1 << 20,
            idle_timeout: Duration::from_secs(10),
        };
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = SmtpServer::new(settings, filter, 10);
        tokio::spawn(async move { server.serve(listener, shutdown).await });
        port
    }

    #[tokio::test]
    async fn test_outgoing_filter_end_to_end() {
        let shutdown = CancellationToken::new();
        let sink = Arc::new(Sink::default());
        let sink_port = spawn_server(sink.clone(), shutdown.clone()).await;

        let config = Config::with_mail_domain("chatmail.example.org");
        let filter = OutgoingFilter::new(&config, Arc::new(MockClock::default()))
            .with_reinjector(Reinjector::new(sink_port, Duration::from_secs(5)));
        let filter_port = spawn_server(Arc::new(filter), shutdown.clone()).await;

        let client = Reinjector::new(filter_port, Duration::from_secs(5));
        let from = "user@chatmail.example.org";

        let encrypted = Envelope::new(
            from,
            vec!["x@other.org".to_string()],
            encrypted_message(from, "x@other.org"),
        );
        client.send(&encrypted).await.unwrap();

        let cleartext = Envelope::new(
            from,
            vec!["x@other.org".to_string()],
            plain_message(from, "x@other.org", "hi"),
        );
        match client.send(&cleartext).await {
            Err(Error::Smtp(message)) => assert!(message.contains("523"), "{message}"),
            other => panic!("expected 523 rejection, got {other:?}"),
        }

        let received = sink.received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0], encrypted);

        shutdown.cancel();
    }
}
