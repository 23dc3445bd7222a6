//! chatrelay Common - Shared types and utilities
//!
//! This crate provides configuration, error types, and the clock
//! abstraction shared by the mail filter and the metadata service.

pub mod clock;
pub mod config;
pub mod error;
pub mod types;

pub use clock::{Clock, MockClock, SystemClock};
pub use config::Config;
pub use error::{Error, Result};
pub use types::{EmailAddress, Envelope};
