//! TURN credential source

use async_trait::async_trait;
use chatrelay_common::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::UnixStream;

/// Hands out short-lived TURN credentials
#[async_trait]
pub trait TurnCredentials: Send + Sync {
    async fn credentials(&self) -> Result<String>;
}

/// Reads one line of credentials from the TURN server's local socket
#[derive(Debug, Clone)]
pub struct UnixTurnCredentials {
    socket: PathBuf,
    timeout: Duration,
}

impl UnixTurnCredentials {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
            timeout: Duration::from_secs(5),
        }
    }
}

#[async_trait]
impl TurnCredentials for UnixTurnCredentials {
    async fn credentials(&self) -> Result<String> {
        let read = async {
            let stream = UnixStream::connect(&self.socket).await?;
            let mut line = String::new();
            BufReader::new(stream).read_line(&mut line).await?;
            Ok::<String, std::io::Error>(line)
        };

        let line = tokio::time::timeout(self.timeout, read)
            .await
            .map_err(|_| Error::Protocol("TURN credential socket timed out".to_string()))??;

        let credentials = line.trim_end_matches(['\r', '\n']);
        if credentials.is_empty() {
            return Err(Error::Protocol("TURN credential socket returned nothing".to_string()));
        }
        Ok(credentials.to_string())
    }
}
