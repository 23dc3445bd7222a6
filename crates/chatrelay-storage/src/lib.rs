//! chatrelay Storage - File-backed state of the relay
//!
//! This crate provides the per-mailbox device token files, the durable
//! notification queue directory and the mailbox policy lookups.

pub mod accounts;
pub mod file;
pub mod queue;
pub mod tokens;

pub use accounts::{AccountStore, MaildirAccounts};
pub use file::{JsonFileStore, JsonObject};
pub use queue::{ClaimedNotification, NotificationQueue, PendingNotification};
pub use tokens::{DeviceTokens, TokenStore};
