//! Per-mailbox device token store
//!
//! Each mailbox keeps its push device tokens in `<addr>/metadata.json` under
//! the `devicetoken` key, mapping token to the Unix time it was last
//! registered. Older files hold a bare list of tokens; those are upgraded to
//! the timestamped form the first time the file is touched.

use crate::file::{JsonFileStore, JsonObject};
use chatrelay_common::{Clock, EmailAddress, Error, Result};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// JSON key holding the device tokens
pub const DEVICETOKEN_KEY: &str = "devicetoken";

/// Tokens expire 90 days after their last registration
pub const TOKEN_MAX_AGE_SECS: i64 = 90 * 24 * 3600;

/// Timestamps further in the future than this are treated as invalid
pub const TOKEN_MAX_FUTURE_SECS: i64 = 60;

/// Device token to last-seen Unix timestamp
pub type DeviceTokens = BTreeMap<String, i64>;

/// Whether a token registered at `timestamp` is still valid at `now`
pub fn is_valid_token_timestamp(timestamp: i64, now: i64) -> bool {
    timestamp > now - TOKEN_MAX_AGE_SECS && timestamp < now + TOKEN_MAX_FUTURE_SECS
}

/// Shape of the stored `devicetoken` value
enum StoredTokens {
    Missing,
    Legacy(Vec<String>),
    Timestamped(DeviceTokens),
}

fn stored_tokens(data: &JsonObject) -> StoredTokens {
    match data.get(DEVICETOKEN_KEY) {
        Some(Value::Object(map)) => StoredTokens::Timestamped(
            map.iter()
                .filter_map(|(token, ts)| {
                    let ts = ts.as_i64().or_else(|| ts.as_f64().map(|f| f as i64))?;
                    Some((token.clone(), ts))
                })
                .collect(),
        ),
        Some(Value::Array(list)) => StoredTokens::Legacy(
            list.iter()
                .filter_map(|token| token.as_str().map(str::to_string))
                .collect(),
        ),
        _ => StoredTokens::Missing,
    }
}

/// Device token store backed by one JSON file per mailbox
pub struct TokenStore {
    files: JsonFileStore,
    clock: Arc<dyn Clock>,
}

impl TokenStore {
    /// Create a token store below the mailboxes directory
    pub fn new(mailboxes_dir: &Path, clock: Arc<dyn Clock>) -> Result<Self> {
        Ok(Self {
            files: JsonFileStore::from_path(mailboxes_dir)?,
            clock,
        })
    }

    fn metadata_path(addr: &str) -> Result<String> {
        if !EmailAddress::is_valid_mailbox(addr) {
            return Err(Error::Validation(format!("invalid mailbox address {addr:?}")));
        }
        Ok(format!("{addr}/metadata.json"))
    }

    /// Exclusive access to the live token map of `addr`.
    ///
    /// Legacy lists are upgraded and expired tokens pruned before `f` runs;
    /// whatever `f` leaves in the map is persisted.
    pub async fn modify_tokens<F, R>(&self, addr: &str, f: F) -> Result<R>
    where
        F: FnOnce(&mut DeviceTokens) -> R,
    {
        let path = Self::metadata_path(addr)?;
        let now = self.clock.unix_now();

        self.files
            .modify(&path, move |data| {
                let mut tokens = match stored_tokens(data) {
                    StoredTokens::Missing => DeviceTokens::new(),
                    StoredTokens::Legacy(list) => {
                        list.into_iter().map(|token| (token, now)).collect()
                    }
                    StoredTokens::Timestamped(tokens) => tokens,
                };
                tokens.retain(|_, ts| is_valid_token_timestamp(*ts, now));

                let result = f(&mut tokens);
                data.insert(DEVICETOKEN_KEY.to_string(), json!(tokens));
                result
            })
            .await
    }

    /// Register `token` for `addr`, refreshing its timestamp
    pub async fn add(&self, addr: &str, token: &str) -> Result<()> {
        let now = self.clock.unix_now();
        self.modify_tokens(addr, |tokens| {
            tokens.insert(token.to_string(), now);
        })
        .await?;
        debug!(addr = %addr, "Registered device token");
        Ok(())
    }

    /// Forget `token` for `addr`; returns whether it was present
    pub async fn remove(&self, addr: &str, token: &str) -> Result<bool> {
        let removed = self
            .modify_tokens(addr, |tokens| tokens.remove(token).is_some())
            .await?;
        if removed {
            info!(addr = %addr, "Removed device token");
        }
        Ok(removed)
    }

    /// Currently valid tokens of `addr`, sorted.
    ///
    /// Expired entries and legacy lists found while reading are cleaned up on
    /// disk as well, so repeated reads observe the same state.
    pub async fn list_valid(&self, addr: &str) -> Result<Vec<String>> {
        let path = Self::metadata_path(addr)?;
        let data = self.files.read(&path).await?;
        let now = self.clock.unix_now();

        match stored_tokens(&data) {
            StoredTokens::Missing => Ok(Vec::new()),
            StoredTokens::Legacy(_) => {
                self.modify_tokens(addr, |tokens| tokens.keys().cloned().collect())
                    .await
            }
            StoredTokens::Timestamped(tokens) => {
                let valid: Vec<String> = tokens
                    .iter()
                    .filter(|(_, ts)| is_valid_token_timestamp(**ts, now))
                    .map(|(token, _)| token.clone())
                    .collect();

                if valid.len() < tokens.len() {
                    debug!(addr = %addr, expired = tokens.len() - valid.len(), "Pruning expired device tokens");
                    self.modify_tokens(addr, |_| ()).await?;
                }
                Ok(valid)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatrelay_common::MockClock;
    use chrono::Duration;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn store(temp_dir: &TempDir) -> (TokenStore, MockClock) {
        let clock = MockClock::default();
        let store = TokenStore::new(temp_dir.path(), Arc::new(clock.clone())).unwrap();
        (store, clock)
    }

    fn read_file(temp_dir: &TempDir, addr: &str) -> Value {
        let content = std::fs::read(temp_dir.path().join(addr).join("metadata.json")).unwrap();
        serde_json::from_slice(&content).unwrap()
    }

    #[test]
    fn test_token_validity_window() {
        let now = 1_700_000_000;
        assert!(is_valid_token_timestamp(now, now));
        assert!(is_valid_token_timestamp(now + 59, now));
        assert!(!is_valid_token_timestamp(now + 60, now));
        assert!(is_valid_token_timestamp(now - TOKEN_MAX_AGE_SECS + 1, now));
        assert!(!is_valid_token_timestamp(now - TOKEN_MAX_AGE_SECS, now));
    }

    #[tokio::test]
    async fn test_add_then_list() {
        let temp_dir = TempDir::new().unwrap();
        let (store, _clock) = store(&temp_dir);

        store.add("user@example.org", "T").await.unwrap();
        assert_eq!(store.list_valid("user@example.org").await.unwrap(), vec!["T"]);

        store.add("user@example.org", "U").await.unwrap();
        assert_eq!(
            store.list_valid("user@example.org").await.unwrap(),
            vec!["T", "U"]
        );
    }

    #[tokio::test]
    async fn test_missing_mailbox_has_no_tokens() {
        let temp_dir = TempDir::new().unwrap();
        let (store, _clock) = store(&temp_dir);

        assert!(store.list_valid("nobody@example.org").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tokens_expire_after_90_days() {
        let temp_dir = TempDir::new().unwrap();
        let (store, clock) = store(&temp_dir);

        store.add("user@example.org", "T").await.unwrap();
        clock.advance(Duration::days(90) + Duration::seconds(1));

        assert!(store.list_valid("user@example.org").await.unwrap().is_empty());
        assert_eq!(
            read_file(&temp_dir, "user@example.org"),
            json!({ DEVICETOKEN_KEY: {} })
        );

        // repeated reads agree
        assert!(store.list_valid("user@example.org").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_re_adding_refreshes_timestamp() {
        let temp_dir = TempDir::new().unwrap();
        let (store, clock) = store(&temp_dir);

        store.add("user@example.org", "T").await.unwrap();
        clock.advance(Duration::days(60));
        store.add("user@example.org", "T").await.unwrap();
        clock.advance(Duration::days(60));

        assert_eq!(store.list_valid("user@example.org").await.unwrap(), vec!["T"]);
    }

    #[tokio::test]
    async fn test_remove_token() {
        let temp_dir = TempDir::new().unwrap();
        let (store, _clock) = store(&temp_dir);

        store.add("user@example.org", "T").await.unwrap();
        assert!(store.remove("user@example.org", "T").await.unwrap());
        assert!(!store.remove("user@example.org", "T").await.unwrap());
        assert!(store.list_valid("user@example.org").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_legacy_list_is_upgraded() {
        let temp_dir = TempDir::new().unwrap();
        let (store, clock) = store(&temp_dir);
        let dir = temp_dir.path().join("old@example.org");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("metadata.json"),
            serde_json::to_vec(&json!({ "devicetoken": ["A", "B"], "other": 1 })).unwrap(),
        )
        .unwrap();

        assert_eq!(store.list_valid("old@example.org").await.unwrap(), vec!["A", "B"]);

        let now = clock.unix_now();
        assert_eq!(
            read_file(&temp_dir, "old@example.org"),
            json!({ "devicetoken": { "A": now, "B": now }, "other": 1 })
        );
    }

    #[tokio::test]
    async fn test_future_timestamps_are_pruned() {
        let temp_dir = TempDir::new().unwrap();
        let (store, clock) = store(&temp_dir);
        let future = clock.unix_now() + 3600;
        let dir = temp_dir.path().join("user@example.org");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("metadata.json"),
            serde_json::to_vec(&json!({ "devicetoken": { "F": future } })).unwrap(),
        )
        .unwrap();

        assert!(store.list_valid("user@example.org").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_address_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let (store, _clock) = store(&temp_dir);

        assert!(matches!(
            store.add("../escape@example.org", "T").await,
            Err(Error::Validation(_))
        ));
        assert!(store.list_valid("no-at-sign").await.is_err());
    }
}
