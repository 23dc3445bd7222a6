//! Push notification dispatch
//!
//! `enqueue` only persists a queue item and wakes a worker, so the dict
//! protocol never waits on the push gateway. A fixed pool of workers claims
//! items, notifies every device of the mailbox and either completes the item
//! or hands it back with a later `not_before`.

use super::push::{PushGateway, PushOutcome};
use chatrelay_common::{Clock, Config, Result};
use chatrelay_storage::{ClaimedNotification, NotificationQueue, PendingNotification, TokenStore};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const MAX_RETRY_DELAY_SECS: u64 = 3600;

/// Worker pool and retry policy
#[derive(Debug, Clone)]
pub struct NotifierSettings {
    pub workers: usize,
    pub max_attempts: u32,
    pub retry_delay: Duration,
    /// How often due items are re-fed to the workers
    pub sweep_interval: Duration,
}

impl NotifierSettings {
    pub fn from_config(config: &Config) -> Self {
        let retry_delay = config.notification_retry_delay();
        Self {
            workers: config.notification_workers.max(1),
            max_attempts: config.notification_max_attempts.max(1),
            retry_delay,
            sweep_interval: retry_delay.max(Duration::from_secs(1)),
        }
    }
}

/// Delay before retry number `attempts + 1`, capped at one hour
pub fn calculate_backoff(base: Duration, attempts: u32) -> chrono::Duration {
    let secs = base
        .as_secs()
        .saturating_mul(2_u64.saturating_pow(attempts))
        .min(MAX_RETRY_DELAY_SECS);
    chrono::Duration::seconds(secs as i64)
}

/// Durable push notification dispatcher
pub struct Notifier {
    queue: NotificationQueue,
    tokens: Arc<TokenStore>,
    gateway: Arc<dyn PushGateway>,
    clock: Arc<dyn Clock>,
    settings: NotifierSettings,
    sender: mpsc::UnboundedSender<Uuid>,
    receiver: AsyncMutex<mpsc::UnboundedReceiver<Uuid>>,
    /// Ids sent to the workers but not yet picked up
    scheduled: Mutex<HashSet<Uuid>>,
}

impl Notifier {
    pub fn new(
        queue: NotificationQueue,
        tokens: Arc<TokenStore>,
        gateway: Arc<dyn PushGateway>,
        clock: Arc<dyn Clock>,
        settings: NotifierSettings,
    ) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            queue,
            tokens,
            gateway,
            clock,
            settings,
            sender,
            receiver: AsyncMutex::new(receiver),
            scheduled: Mutex::new(HashSet::new()),
        }
    }

    pub fn queue(&self) -> &NotificationQueue {
        &self.queue
    }

    fn schedule(&self, id: Uuid) {
        let newly_scheduled = self
            .scheduled
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id);
        if newly_scheduled {
            // the receiver lives as long as self
            let _ = self.sender.send(id);
        }
    }

    fn unschedule(&self, id: Uuid) {
        self.scheduled
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
    }

    /// Queue a wake-up for every device of `addr`.
    ///
    /// Returns `None` without queueing anything if the mailbox has no valid
    /// device tokens.
    pub async fn enqueue(&self, addr: &str) -> Result<Option<Uuid>> {
        if self.tokens.list_valid(addr).await?.is_empty() {
            debug!(addr = %addr, "No device tokens, skipping notification");
            return Ok(None);
        }

        let item = PendingNotification::new(addr, self.clock.now());
        let id = self.queue.push(&item).await?;
        self.schedule(id);
        Ok(Some(id))
    }

    /// Feed every due pending item to the workers
    pub async fn sweep(&self) -> Result<usize> {
        let due = self.queue.due(self.clock.now()).await?;
        let count = due.len();
        for id in due {
            self.schedule(id);
        }
        Ok(count)
    }

    /// Claim and deliver one queue item.
    ///
    /// Items already claimed elsewhere are skipped.
    pub async fn deliver(&self, id: Uuid) -> Result<()> {
        let Some(claimed) = self.queue.claim(id).await? else {
            debug!(id = %id, "Notification already handled");
            return Ok(());
        };
        let addr = claimed.item.addr.as_str();

        let tokens = match &claimed.item.pending_tokens {
            Some(tokens) => tokens.clone(),
            None => match self.tokens.list_valid(addr).await {
                Ok(tokens) => tokens,
                Err(e) if e.is_transient() => {
                    warn!(id = %id, addr = %addr, "Failed to load device tokens: {}", e);
                    return self.retry(&claimed, None).await;
                }
                Err(e) => {
                    warn!(id = %id, addr = %addr, "Dropping notification: {}", e);
                    return self.queue.complete(&claimed).await;
                }
            },
        };

        let mut failed = Vec::new();
        for token in tokens {
            match self.gateway.notify(&token).await {
                PushOutcome::Delivered => {}
                PushOutcome::InvalidToken => {
                    info!(addr = %addr, "Push gateway rejected device token");
                    if let Err(e) = self.tokens.remove(addr, &token).await {
                        error!(addr = %addr, "Failed to remove device token: {}", e);
                    }
                }
                PushOutcome::Transient(reason) => {
                    debug!(addr = %addr, "Push delivery failed: {}", reason);
                    failed.push(token);
                }
            }
        }

        if failed.is_empty() {
            debug!(id = %id, addr = %addr, "Notification delivered");
            self.queue.complete(&claimed).await
        } else {
            self.retry(&claimed, Some(failed)).await
        }
    }

    async fn retry(&self, claimed: &ClaimedNotification, pending_tokens: Option<Vec<String>>) -> Result<()> {
        let attempts = claimed.item.attempts + 1;
        if attempts >= self.settings.max_attempts {
            warn!(
                id = %claimed.id,
                addr = %claimed.item.addr,
                attempts,
                "Dropping notification after too many attempts"
            );
            return self.queue.complete(claimed).await;
        }

        let delay = calculate_backoff(self.settings.retry_delay, claimed.item.attempts);
        let item = PendingNotification {
            attempts,
            not_before: self.clock.now() + delay,
            pending_tokens,
            ..claimed.item.clone()
        };
        debug!(id = %claimed.id, attempts, delay_secs = delay.num_seconds(), "Scheduled notification retry");
        self.queue.release(claimed, &item).await
    }

    /// Recover interrupted items and spawn the workers and the sweeper on
    /// `tracker`. Everything stops once `shutdown` is cancelled; a worker
    /// finishes the item in hand first.
    pub async fn start(self: &Arc<Self>, tracker: &TaskTracker, shutdown: CancellationToken) -> Result<()> {
        self.queue.recover().await?;

        for index in 0..self.settings.workers {
            tracker.spawn(self.clone().worker(index, shutdown.clone()));
        }
        tracker.spawn(self.clone().sweeper(shutdown));

        info!(workers = self.settings.workers, "Notification workers started");
        Ok(())
    }

    async fn worker(self: Arc<Self>, index: usize, shutdown: CancellationToken) {
        loop {
            let id = {
                let mut receiver = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    receiver = self.receiver.lock() => receiver,
                };
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    id = receiver.recv() => match id {
                        Some(id) => id,
                        None => break,
                    },
                }
            };
            self.unschedule(id);

            if let Err(e) = self.deliver(id).await {
                error!(worker = index, id = %id, "Notification delivery error: {}", e);
            }
        }
        debug!(worker = index, "Notification worker stopped");
    }

    async fn sweeper(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = interval(self.settings.sweep_interval);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.sweep().await {
                Ok(0) => {}
                Ok(count) => debug!(count, "Re-scheduled due notifications"),
                Err(e) => error!("Notification sweep failed: {}", e),
            }
        }
    }
}
