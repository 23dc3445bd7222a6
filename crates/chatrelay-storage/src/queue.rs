//! Durable notification queue on top of a plain directory
//!
//! Every pending item is one `<id>.pending` JSON file. A worker claims an item
//! by renaming it to `<id>.claimed`; the rename either succeeds for exactly one
//! worker or fails with `NotFound` for everybody else.

use crate::file::write_atomic;
use chatrelay_common::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

const PENDING_EXT: &str = "pending";
const CLAIMED_EXT: &str = "claimed";

/// A push wake-up waiting to be delivered for one mailbox
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingNotification {
    pub addr: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub attempts: u32,
    pub not_before: DateTime<Utc>,
    /// Tokens still to be notified; `None` means every valid token of the mailbox
    #[serde(default)]
    pub pending_tokens: Option<Vec<String>>,
}

impl PendingNotification {
    pub fn new(addr: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            addr: addr.into(),
            created_at: now,
            attempts: 0,
            not_before: now,
            pending_tokens: None,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.not_before <= now
    }
}

/// An item owned by one worker until it is completed or released
#[derive(Debug, Clone)]
pub struct ClaimedNotification {
    pub id: Uuid,
    pub item: PendingNotification,
}

/// Queue directory holding pending and claimed notifications
pub struct NotificationQueue {
    dir: PathBuf,
}

impl NotificationQueue {
    /// Open the queue, creating its directory if needed
    pub async fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .await
            .map_err(|e| Error::Storage(format!("Failed to create queue directory: {}", e)))?;

        info!(path = %dir.display(), "Opened notification queue");

        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    fn item_path(&self, id: Uuid, ext: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", id, ext))
    }

    /// Persist a new item and return its id
    pub async fn push(&self, item: &PendingNotification) -> Result<Uuid> {
        let id = Uuid::now_v7();
        write_atomic(&self.item_path(id, PENDING_EXT), &serde_json::to_vec(item)?).await?;
        debug!(id = %id, addr = %item.addr, "Queued notification");
        Ok(id)
    }

    /// Take exclusive ownership of a pending item.
    ///
    /// Returns `None` if another worker claimed it first or the item is gone.
    /// Unreadable items are discarded.
    pub async fn claim(&self, id: Uuid) -> Result<Option<ClaimedNotification>> {
        let pending = self.item_path(id, PENDING_EXT);
        let claimed = self.item_path(id, CLAIMED_EXT);

        match fs::rename(&pending, &claimed).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Storage(format!("Failed to claim {}: {}", id, e))),
        }

        let content = fs::read(&claimed)
            .await
            .map_err(|e| Error::Storage(format!("Failed to read {}: {}", id, e)))?;

        match serde_json::from_slice::<PendingNotification>(&content) {
            Ok(item) => Ok(Some(ClaimedNotification { id, item })),
            Err(e) => {
                warn!(id = %id, "Discarding unreadable queue item: {}", e);
                let _ = fs::remove_file(&claimed).await;
                Ok(None)
            }
        }
    }

    /// Delete a claimed item for good
    pub async fn complete(&self, claimed: &ClaimedNotification) -> Result<()> {
        match fs::remove_file(self.item_path(claimed.id, CLAIMED_EXT)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Storage(format!(
                "Failed to remove {}: {}",
                claimed.id, e
            ))),
        }
    }

    /// Hand a claimed item back to the queue with updated retry state
    pub async fn release(&self, claimed: &ClaimedNotification, item: &PendingNotification) -> Result<()> {
        // update in place while still claimed, so the pending file only ever
        // appears through the rename
        let claimed_path = self.item_path(claimed.id, CLAIMED_EXT);
        write_atomic(&claimed_path, &serde_json::to_vec(item)?).await?;
        fs::rename(&claimed_path, self.item_path(claimed.id, PENDING_EXT))
            .await
            .map_err(|e| Error::Storage(format!("Failed to release {}: {}", claimed.id, e)))
    }

    async fn ids_with_ext(&self, ext: &str) -> Result<Vec<Uuid>> {
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|e| Error::Storage(format!("Failed to list queue directory: {}", e)))?;

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ext) {
                continue;
            }
            if let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| Uuid::parse_str(s).ok())
            {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    /// Ids of pending items whose retry time has come, oldest first
    pub async fn due(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let mut due = Vec::new();
        for id in self.ids_with_ext(PENDING_EXT).await? {
            let content = match fs::read(self.item_path(id, PENDING_EXT)).await {
                Ok(content) => content,
                // claimed meanwhile
                Err(_) => continue,
            };
            match serde_json::from_slice::<PendingNotification>(&content) {
                Ok(item) if item.is_due(now) => due.push((item.not_before, id)),
                Ok(_) => {}
                // claim() discards it
                Err(_) => due.push((now, id)),
            }
        }
        due.sort();
        Ok(due.into_iter().map(|(_, id)| id).collect())
    }

    /// Return items claimed by a previous process to the pending state
    pub async fn recover(&self) -> Result<usize> {
        let mut recovered = 0;
        for id in self.ids_with_ext(CLAIMED_EXT).await? {
            fs::rename(self.item_path(id, CLAIMED_EXT), self.item_path(id, PENDING_EXT))
                .await
                .map_err(|e| Error::Storage(format!("Failed to recover {}: {}", id, e)))?;
            recovered += 1;
        }
        if recovered > 0 {
            info!(count = recovered, "Recovered interrupted notifications");
        }
        Ok(recovered)
    }

    /// Number of items on disk, pending or claimed
    pub async fn len(&self) -> Result<usize> {
        Ok(self.ids_with_ext(PENDING_EXT).await?.len() + self.ids_with_ext(CLAIMED_EXT).await?.len())
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}
