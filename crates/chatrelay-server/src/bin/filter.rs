//! chatrelay-filter - encrypted-or-reject SMTP filter

use anyhow::{bail, Context, Result};
use chatrelay_common::{Config, SystemClock};
use chatrelay_core::{BeforeQueueFilter, IncomingFilter, OutgoingFilter, SmtpServer};
use chatrelay_server::{init_logging, FilterMode};
use chatrelay_storage::MaildirAccounts;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() != 3 {
        bail!("usage: chatrelay-filter <config> <incoming|outgoing>");
    }
    let config_path = PathBuf::from(&args[1]);
    let mode: FilterMode = args[2].parse()?;

    let config = Config::from_file(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    init_logging(&config.log_format);

    let filter: Arc<dyn BeforeQueueFilter> = match mode {
        FilterMode::Outgoing => Arc::new(OutgoingFilter::new(&config, Arc::new(SystemClock))),
        FilterMode::Incoming => {
            let accounts = MaildirAccounts::new(config.mailboxes_dir());
            Arc::new(IncomingFilter::new(&config, Arc::new(accounts)))
        }
    };

    let shutdown = CancellationToken::new();
    let server = SmtpServer::with_config(&config, filter);
    let listen_addr = mode.listen_addr(&config);

    info!(mode = ?mode, "Starting chatrelay filter for {}", config.mail_domain);

    let mut serve = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { server.run(listen_addr, shutdown).await })
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Shutdown signal received");
            shutdown.cancel();
        }
        result = &mut serve => {
            // the listener stopped on its own
            return result?;
        }
    }

    serve.await??;
    info!("chatrelay filter stopped");
    Ok(())
}
