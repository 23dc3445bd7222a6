//! Chatrelay Core - mail filtering and metadata services
//!
//! The SMTP filter rejects unencrypted mail in both directions; the metadata
//! service stores device tokens and wakes devices through a push gateway.

pub mod filter;
pub mod metadata;
pub mod smtp;

pub use filter::{BeforeQueueFilter, IncomingFilter, OutgoingFilter, SmtpReply};
pub use metadata::{HttpPushGateway, MetadataServer, MetadataService, Notifier, NotifierSettings, UnixTurnCredentials};
pub use smtp::{Reinjector, SmtpServer};
