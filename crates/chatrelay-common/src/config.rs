//! Configuration for chatrelay
//!
//! Both services read the same relay configuration file. Its keys live in a
//! `[params]` section; the format follows the file extension (`.ini` or
//! `.toml`), and `CHATRELAY_PARAMS__<KEY>` environment variables override
//! individual values.

use serde::{Deserialize, Deserializer, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top level of the configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    pub params: Config,
}

/// Relay configuration, immutable after load
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Mail domain served by this relay
    pub mail_domain: String,

    /// Maximum number of accepted MAIL commands per sender and minute
    #[serde(default = "default_max_user_send_per_minute")]
    pub max_user_send_per_minute: u32,

    /// Maximum message size in bytes
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Senders allowed to send cleartext to anyone
    #[serde(default, deserialize_with = "word_list")]
    pub passthrough_senders: Vec<String>,

    /// Recipients (`user@domain` or `@domain`) that may receive cleartext
    #[serde(default, deserialize_with = "word_list")]
    pub passthrough_recipients: Vec<String>,

    /// Listening port of the outgoing filter
    #[serde(default = "default_filtermail_smtp_port")]
    pub filtermail_smtp_port: u16,

    /// Listening port of the incoming filter
    #[serde(default = "default_filtermail_smtp_port_incoming")]
    pub filtermail_smtp_port_incoming: u16,

    /// Trusted SMTP port receiving outgoing mail that passed the filter
    #[serde(default = "default_postfix_reinject_port")]
    pub postfix_reinject_port: u16,

    /// Trusted SMTP port receiving incoming mail that passed the filter
    #[serde(default = "default_postfix_reinject_port_incoming")]
    pub postfix_reinject_port_incoming: u16,

    /// Local source address for incoming re-injection
    #[serde(default = "default_reinject_source_address_incoming")]
    pub reinject_source_address_incoming: IpAddr,

    /// Upper bound for one re-injection, in seconds
    #[serde(default = "default_reinject_timeout")]
    pub reinject_timeout_secs: u64,

    /// Idle timeout for SMTP sessions, in seconds
    #[serde(default = "default_smtp_session_timeout")]
    pub smtp_session_timeout_secs: u64,

    /// Maximum concurrent SMTP connections per filter
    #[serde(default = "default_max_smtp_connections")]
    pub max_smtp_connections: usize,

    /// Directory holding one sub-directory per mailbox
    #[serde(default)]
    pub mailboxes_dir: Option<PathBuf>,

    /// Iroh relay URL; absent means `https://<mail_domain>`, empty disables it
    #[serde(default)]
    pub iroh_relay: Option<String>,

    /// Unix socket of the TURN credential service
    #[serde(default = "default_turn_socket")]
    pub turn_socket: PathBuf,

    /// Port announced for the TURN server
    #[serde(default = "default_turn_port")]
    pub turn_port: u16,

    /// Unix socket the metadata service listens on
    #[serde(default = "default_metadata_socket")]
    pub metadata_socket: PathBuf,

    /// Push notification gateway endpoint
    #[serde(default = "default_push_notification_url")]
    pub push_notification_url: String,

    /// Request timeout towards the push gateway, in seconds
    #[serde(default = "default_push_timeout")]
    pub push_timeout_secs: u64,

    /// Number of notification dispatch workers
    #[serde(default = "default_notification_workers")]
    pub notification_workers: usize,

    /// Delivery attempts before a notification is dropped
    #[serde(default = "default_notification_max_attempts")]
    pub notification_max_attempts: u32,

    /// Base delay between notification retries, in seconds
    #[serde(default = "default_notification_retry_delay")]
    pub notification_retry_delay_secs: u64,

    /// Log format: "text" or "json"
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_max_user_send_per_minute() -> u32 {
    60
}

fn default_max_message_size() -> usize {
    31_457_280 // 30 MiB
}

fn default_filtermail_smtp_port() -> u16 {
    10080
}

fn default_filtermail_smtp_port_incoming() -> u16 {
    10081
}

fn default_postfix_reinject_port() -> u16 {
    10025
}

fn default_postfix_reinject_port_incoming() -> u16 {
    10026
}

fn default_reinject_source_address_incoming() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 2))
}

fn default_reinject_timeout() -> u64 {
    60
}

fn default_smtp_session_timeout() -> u64 {
    300
}

fn default_max_smtp_connections() -> usize {
    100
}

fn default_turn_socket() -> PathBuf {
    PathBuf::from("/run/chatmail-turn/turn.socket")
}

fn default_turn_port() -> u16 {
    3478
}

fn default_metadata_socket() -> PathBuf {
    PathBuf::from("/run/chatmail-metadata/metadata.socket")
}

fn default_push_notification_url() -> String {
    "https://notifications.delta.chat/notify".to_string()
}

fn default_push_timeout() -> u64 {
    60
}

fn default_notification_workers() -> usize {
    4
}

fn default_notification_max_attempts() -> u32 {
    6
}

fn default_notification_retry_delay() -> u64 {
    8
}

fn default_log_format() -> String {
    "text".to_string()
}

/// Accepts either a whitespace separated string (INI) or a list (TOML)
fn word_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Words {
        List(Vec<String>),
        Text(String),
    }

    Ok(match Words::deserialize(deserializer)? {
        Words::List(list) => list,
        Words::Text(text) => text.split_whitespace().map(str::to_string).collect(),
    })
}

impl Config {
    /// Configuration with every optional key at its default
    pub fn with_mail_domain(mail_domain: impl Into<String>) -> Self {
        Self {
            mail_domain: mail_domain.into(),
            max_user_send_per_minute: default_max_user_send_per_minute(),
            max_message_size: default_max_message_size(),
            passthrough_senders: Vec::new(),
            passthrough_recipients: Vec::new(),
            filtermail_smtp_port: default_filtermail_smtp_port(),
            filtermail_smtp_port_incoming: default_filtermail_smtp_port_incoming(),
            postfix_reinject_port: default_postfix_reinject_port(),
            postfix_reinject_port_incoming: default_postfix_reinject_port_incoming(),
            reinject_source_address_incoming: default_reinject_source_address_incoming(),
            reinject_timeout_secs: default_reinject_timeout(),
            smtp_session_timeout_secs: default_smtp_session_timeout(),
            max_smtp_connections: default_max_smtp_connections(),
            mailboxes_dir: None,
            iroh_relay: None,
            turn_socket: default_turn_socket(),
            turn_port: default_turn_port(),
            metadata_socket: default_metadata_socket(),
            push_notification_url: default_push_notification_url(),
            push_timeout_secs: default_push_timeout(),
            notification_workers: default_notification_workers(),
            notification_max_attempts: default_notification_max_attempts(),
            notification_retry_delay_secs: default_notification_retry_delay(),
            log_format: default_log_format(),
        }
    }

    /// Load configuration from file, with environment overrides
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        if !path.exists() {
            return Err(crate::Error::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(
                config::Environment::with_prefix("CHATRELAY")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let file: ConfigFile = settings.try_deserialize()?;
        file.params.validate()?;

        tracing::debug!(path = %path.display(), domain = %file.params.mail_domain, "Loaded configuration");

        Ok(file.params)
    }

    fn validate(&self) -> crate::Result<()> {
        if self.mail_domain.trim().is_empty() {
            return Err(crate::Error::Config("mail_domain must not be empty".to_string()));
        }
        if self.notification_workers == 0 {
            return Err(crate::Error::Config(
                "notification_workers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Directory holding the per-mailbox directories
    pub fn mailboxes_dir(&self) -> PathBuf {
        match &self.mailboxes_dir {
            Some(dir) => dir.clone(),
            None => PathBuf::from(format!("/home/vmail/mail/{}", self.mail_domain)),
        }
    }

    /// Iroh relay URL announced to clients, if enabled
    pub fn iroh_relay_url(&self) -> Option<String> {
        match &self.iroh_relay {
            None => Some(format!("https://{}", self.mail_domain)),
            Some(url) if url.trim().is_empty() => None,
            Some(url) => Some(url.trim().to_string()),
        }
    }

    pub fn reinject_timeout(&self) -> Duration {
        Duration::from_secs(self.reinject_timeout_secs)
    }

    pub fn smtp_session_timeout(&self) -> Duration {
        Duration::from_secs(self.smtp_session_timeout_secs)
    }

    pub fn push_timeout(&self) -> Duration {
        Duration::from_secs(self.push_timeout_secs)
    }

    pub fn notification_retry_delay(&self) -> Duration {
        Duration::from_secs(self.notification_retry_delay_secs)
    }
}
