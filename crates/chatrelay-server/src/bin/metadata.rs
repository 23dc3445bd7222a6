//! chatrelay-metadata - device tokens, push notifications and server info

use anyhow::{bail, Context, Result};
use chatrelay_common::{Config, SystemClock};
use chatrelay_core::metadata::{
    HttpPushGateway, MetadataServer, MetadataService, Notifier, NotifierSettings, UnixTurnCredentials,
};
use chatrelay_server::init_logging;
use chatrelay_storage::{NotificationQueue, TokenStore};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 || args.len() > 3 {
        bail!("usage: chatrelay-metadata <config> [socket]");
    }
    let config_path = PathBuf::from(&args[1]);

    let config = Config::from_file(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    init_logging(&config.log_format);

    let socket = args
        .get(2)
        .map(PathBuf::from)
        .unwrap_or_else(|| config.metadata_socket.clone());

    let mailboxes_dir = config.mailboxes_dir();
    if !mailboxes_dir.is_dir() {
        error!("Mailboxes directory {} does not exist", mailboxes_dir.display());
        std::process::exit(1);
    }

    let clock = Arc::new(SystemClock);
    let tokens = Arc::new(TokenStore::new(&mailboxes_dir, clock.clone())?);
    let queue = NotificationQueue::open(&mailboxes_dir.join("pending_notifications")).await?;
    let gateway = Arc::new(HttpPushGateway::with_config(&config)?);
    let notifier = Arc::new(Notifier::new(
        queue,
        tokens.clone(),
        gateway,
        clock,
        NotifierSettings::from_config(&config),
    ));

    let shutdown = CancellationToken::new();
    let tracker = TaskTracker::new();
    notifier.start(&tracker, shutdown.clone()).await?;

    let turn = Arc::new(UnixTurnCredentials::new(config.turn_socket.clone()));
    let service = Arc::new(MetadataService::new(&config, tokens, notifier, turn));
    let server = MetadataServer::new(service);

    info!("Starting chatrelay metadata service for {}", config.mail_domain);

    let mut serve = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { server.run(&socket, shutdown).await })
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
    tracker.close();
    tracker.wait().await;
    info!("chatrelay metadata service stopped");
    Ok(())
}
