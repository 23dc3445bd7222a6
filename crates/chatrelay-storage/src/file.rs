//! JSON file storage with per-file exclusive modification

use chatrelay_common::{Error, Result};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::fs;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A JSON object as stored on disk
pub type JsonObject = Map<String, Value>;

/// Stores one JSON object per file below a base directory.
///
/// Writers of the same file are serialized by a lock owned by this store;
/// writers of different files never wait for each other. Every write goes to
/// a temporary file in the target directory which is then renamed over the
/// target, so readers see either the old or the new content.
pub struct JsonFileStore {
    base_path: PathBuf,
    locks: Mutex<HashMap<String, Weak<AsyncMutex<()>>>>,
}

impl JsonFileStore {
    /// Create a store rooted at `path`, creating the directory if needed
    pub fn from_path(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)
            .map_err(|e| Error::Storage(format!("Failed to create storage directory: {}", e)))?;

        info!(path = %path.display(), "Initialized JSON file storage");

        Ok(Self {
            base_path: path.to_path_buf(),
            locks: Mutex::new(HashMap::new()),
        })
    }

    /// Get full path for a relative path, with path traversal protection
    fn full_path(&self, path: &str) -> Result<PathBuf> {
        if path.is_empty() {
            return Err(Error::Storage("Empty path".to_string()));
        }

        if path.contains("..") {
            return Err(Error::Storage(
                "Path traversal detected: '..' is not allowed".to_string(),
            ));
        }

        if path.starts_with('/') || path.starts_with('\\') {
            return Err(Error::Storage("Absolute paths are not allowed".to_string()));
        }

        Ok(self.base_path.join(path))
    }

    /// Lock guarding writers of one file
    fn lock_for(&self, path: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.retain(|_, lock| lock.strong_count() > 0);

        if let Some(lock) = locks.get(path).and_then(Weak::upgrade) {
            return lock;
        }

        let lock = Arc::new(AsyncMutex::new(()));
        locks.insert(path.to_string(), Arc::downgrade(&lock));
        lock
    }

    /// Read the object stored at `path`; a missing file reads as empty
    pub async fn read(&self, path: &str) -> Result<JsonObject> {
        let full_path = self.full_path(path)?;
        read_object(&full_path).await
    }

    /// Run `f` on the stored object while holding the file's write lock,
    /// then persist the result atomically if `f` changed it.
    pub async fn modify<F, R>(&self, path: &str, f: F) -> Result<R>
    where
        F: FnOnce(&mut JsonObject) -> R,
    {
        let full_path = self.full_path(path)?;
        let lock = self.lock_for(path);
        let _guard = lock.lock().await;

        let original = read_object(&full_path).await?;
        let mut data = original.clone();
        let result = f(&mut data);

        if data != original {
            write_atomic(&full_path, &serde_json::to_vec(&Value::Object(data))?).await?;
            debug!(path = %path, "Persisted JSON file");
        }

        Ok(result)
    }
}

async fn read_object(full_path: &Path) -> Result<JsonObject> {
    let content = match fs::read(full_path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(JsonObject::new()),
        Err(e) => return Err(Error::Storage(format!("Failed to read file: {}", e))),
    };

    match serde_json::from_slice::<Value>(&content) {
        Ok(Value::Object(object)) => Ok(object),
        Ok(_) => {
            warn!(path = %full_path.display(), "JSON file does not contain an object, treating as empty");
            Ok(JsonObject::new())
        }
        Err(e) => {
            warn!(path = %full_path.display(), "Corrupt JSON file, treating as empty: {}", e);
            Ok(JsonObject::new())
        }
    }
}

/// Write `data` to a temporary sibling of `path` and rename it into place
pub(crate) async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::Storage("Invalid file path".to_string()))?;
    fs::create_dir_all(parent)
        .await
        .map_err(|e| Error::Storage(format!("Failed to create directory: {}", e)))?;

    let tmp_path = parent.join(format!(".{}.tmp", Uuid::new_v4()));
    if let Err(e) = fs::write(&tmp_path, data).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(Error::Storage(format!("Failed to write file: {}", e)));
    }

    if let Err(e) = fs::rename(&tmp_path, path).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(Error::Storage(format!("Failed to rename file: {}", e)));
    }

    Ok(())
}
