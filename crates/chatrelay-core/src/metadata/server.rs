//! Dict protocol server for the IMAP server's metadata lookups

use super::command::{DictCommand, DictParser};
use super::notifier::Notifier;
use super::response::DictResponse;
use super::turn::TurnCredentials;
use anyhow::Result;
use chatrelay_common::Config;
use chatrelay_storage::TokenStore;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

const IROH_RELAY_KEY: &str = "vendor/vendor.dovecot/pvt/server/vendor/deltachat/irohrelay";
const TURN_KEY: &str = "vendor/vendor.dovecot/pvt/server/vendor/deltachat/turn";

/// Longest request line, including the newline
const MAX_DICT_LINE: usize = 64 * 1024;

/// Answers metadata lookups and applies metadata updates
pub struct MetadataService {
    tokens: Arc<TokenStore>,
    notifier: Arc<Notifier>,
    turn: Arc<dyn TurnCredentials>,
    mail_domain: String,
    turn_port: u16,
    iroh_relay: Option<String>,
}

impl MetadataService {
    pub fn new(
        config: &Config,
        tokens: Arc<TokenStore>,
        notifier: Arc<Notifier>,
        turn: Arc<dyn TurnCredentials>,
    ) -> Self {
        Self {
            tokens,
            notifier,
            turn,
            mail_domain: config.mail_domain.clone(),
            turn_port: config.turn_port,
            iroh_relay: config.iroh_relay_url(),
        }
    }

    /// Response line for `L<key>\t<user>`
    pub async fn lookup(&self, key: &str, user: &str) -> String {
        let parts: Vec<&str> = key.splitn(3, '/').collect();

        match parts.as_slice() {
            ["priv", _, "devicetoken"] => match self.tokens.list_valid(user).await {
                Ok(tokens) => DictResponse::ok(&tokens.join(" ")),
                Err(e) => {
                    error!(user = %user, code = e.code(), "Failed to read device tokens: {}", e);
                    DictResponse::fail()
                }
            },
            ["shared", _, IROH_RELAY_KEY] => match &self.iroh_relay {
                Some(url) => DictResponse::ok(url),
                None => DictResponse::not_found(),
            },
            ["shared", _, TURN_KEY] => match self.turn.credentials().await {
                Ok(credentials) => {
                    DictResponse::ok(&format!("{}:{}:{}", self.mail_domain, self.turn_port, credentials))
                }
                Err(e) => {
                    error!("Failed to get TURN credentials: {}", e);
                    DictResponse::fail()
                }
            },
            _ => {
                warn!(key = %key, "Lookup of unknown metadata key");
                DictResponse::not_found()
            }
        }
    }

    /// Apply `S<txn>\t<key>\t<value>` for mailbox `user`; returns whether the
    /// key was handled
    pub async fn set(&self, user: &str, key: &str, value: &str) -> bool {
        let parts: Vec<&str> = key.splitn(3, '/').collect();

        match parts.as_slice() {
            ["priv", _, "devicetoken"] if !value.is_empty() => {
                match self.tokens.add(user, value).await {
                    Ok(()) => true,
                    Err(e) => {
                        error!(user = %user, code = e.code(), "Failed to store device token: {}", e);
                        false
                    }
                }
            }
            ["priv", _, "messagenew"] => match self.notifier.enqueue(user).await {
                Ok(_) => true,
                Err(e) => {
                    error!(user = %user, code = e.code(), "Failed to queue notification: {}", e);
                    false
                }
            },
            _ => {
                warn!(key = %key, "Set of unhandled metadata key");
                false
            }
        }
    }
}

/// Open transaction of one connection
struct Transaction {
    user: String,
    failed: bool,
}

/// Dict protocol listener on a Unix socket
pub struct MetadataServer {
    service: Arc<MetadataService>,
}

impl MetadataServer {
    pub fn new(service: Arc<MetadataService>) -> Self {
        Self { service }
    }

    /// Bind `path`, replacing a stale socket file, and serve until `shutdown`
    pub async fn run(&self, path: &Path, shutdown: CancellationToken) -> Result<()> {
        if path.exists() {
            tokio::fs::remove_file(path).await?;
        }
        let listener = UnixListener::bind(path)?;
        info!("Metadata service listening on {}", path.display());
        self.serve(listener, shutdown).await
    }

    /// Accept connections until `shutdown`, then wait for open connections to
    /// finish their current request
    pub async fn serve(&self, listener: UnixListener, shutdown: CancellationToken) -> Result<()> {
        let tracker = TaskTracker::new();

        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, _)) => {
                    let service = self.service.clone();
                    let shutdown = shutdown.clone();
                    tracker.spawn(async move {
                        if let Err(e) = Self::handle_connection(service, stream, shutdown).await {
                            error!("Metadata connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Metadata accept error: {}", e);
                }
            }
        }

        info!("Metadata service shutting down");
        tracker.close();
        tracker.wait().await;
        Ok(())
    }

    async fn handle_connection(
        service: Arc<MetadataService>,
        stream: UnixStream,
        shutdown: CancellationToken,
    ) -> Result<()> {
        debug!("New metadata connection");

        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut transactions: HashMap<String, Transaction> = HashMap::new();
        let mut buf = Vec::new();
        let mut discarding = false;

        loop {
            buf.clear();

            let mut limited = (&mut reader).take(MAX_DICT_LINE as u64);
            let n = tokio::select! {
                _ = shutdown.cancelled() => break,
                n = limited.read_until(b'\n', &mut buf) => n?,
            };
            if n == 0 {
                break;
            }

            let complete = buf.last() == Some(&b'\n');
            if discarding {
                discarding = !complete;
                continue;
            }
            if !complete && n == MAX_DICT_LINE {
                warn!("Dropping overlong dict request");
                discarding = true;
                continue;
            }

            let line = String::from_utf8_lossy(&buf);
            let response = match DictParser::parse(&line) {
                DictCommand::Hello => None,
                DictCommand::Lookup { key, user } => Some(service.lookup(&key, &user).await),
                DictCommand::Iterate => Some(DictResponse::empty_iteration()),
                DictCommand::Begin { txn, user } => {
                    transactions.insert(txn, Transaction { user, failed: false });
                    None
                }
                DictCommand::Set { txn, key, value } => {
                    match transactions.get_mut(&txn) {
                        Some(transaction) => {
                            if !service.set(&transaction.user, &key, &value).await {
                                transaction.failed = true;
                            }
                        }
                        None => warn!(txn = %txn, "Set outside of a transaction"),
                    }
                    None
                }
                DictCommand::Commit { txn } => match transactions.remove(&txn) {
                    Some(transaction) if transaction.failed => Some(DictResponse::fail()),
                    Some(_) => Some(DictResponse::ok("")),
                    None => {
                        warn!(txn = %txn, "Commit of unknown transaction");
                        None
                    }
                },
                DictCommand::Rollback { txn } => {
                    transactions.remove(&txn);
                    None
                }
                DictCommand::Unknown { line } => {
                    warn!(line = %line, "Unknown dict command");
                    None
                }
            };

            if let Some(response) = response {
                writer.write_all(response.as_bytes()).await?;
                writer.flush().await?;
            }
        }

        debug!("Metadata connection closed");
        Ok(())
    }
}
