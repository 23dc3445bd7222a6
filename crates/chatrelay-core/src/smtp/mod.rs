//! SMTP listener and re-injection client of the mail filter

mod handler;
mod reinject;
mod server;

pub use handler::{SessionSettings, SmtpHandler};
pub use reinject::Reinjector;
pub use server::SmtpServer;
