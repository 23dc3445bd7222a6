//! Metadata service behind the IMAP server
//!
//! Serves device-token and server-info lookups over the dict protocol and
//! turns new-message signals into push notifications.

mod command;
mod notifier;
mod push;
mod response;
mod server;
mod turn;

pub use command::{DictCommand, DictParser};
pub use notifier::{calculate_backoff, Notifier, NotifierSettings};
pub use push::{HttpPushGateway, PushGateway, PushOutcome};
pub use response::DictResponse;
pub use server::{MetadataServer, MetadataService};
pub use turn::{TurnCredentials, UnixTurnCredentials};
