//! Shared startup code of the chatrelay daemons

use anyhow::{bail, Result};
use chatrelay_common::Config;
use std::net::{Ipv4Addr, SocketAddr};
use std::str::FromStr;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global subscriber; `format` is `text` or `json`
pub fn init_logging(format: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,chatrelay=debug"));

    let registry = tracing_subscriber::registry().with(filter);
    if format == "json" {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}

/// Direction a filter process handles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    Outgoing,
    Incoming,
}

impl FilterMode {
    /// Local address the filter listens on
    pub fn listen_addr(&self, config: &Config) -> SocketAddr {
        let port = match self {
            FilterMode::Outgoing => config.filtermail_smtp_port,
            FilterMode::Incoming => config.filtermail_smtp_port_incoming,
        };
        SocketAddr::from((Ipv4Addr::LOCALHOST, port))
    }
}

impl FromStr for FilterMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "outgoing" => Ok(FilterMode::Outgoing),
            "incoming" => Ok(FilterMode::Incoming),
            other => bail!("unknown filter mode {other:?}, expected incoming or outgoing"),
        }
    }
}
