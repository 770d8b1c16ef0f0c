use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use voucher_inbox::config::Config;
use voucher_inbox::mailbox::{ImapConnector, MailboxConnector};
use voucher_inbox::poller::{run_and_log, spawn_poller};
use voucher_inbox::processor::MessageProcessor;
use voucher_inbox::upload::LexofficeUploader;

/// Upload mailbox attachments to Lexoffice and file processed mail away.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Process the inbox once and exit instead of polling.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let config = Config::from_env().unwrap_or_else(|e| {
        error!("{e}");
        if let Some(hint) = e.hint() {
            eprintln!("{hint}");
        }
        std::process::exit(1);
    });

    info!(
        host = %config.mailbox.host,
        port = config.mailbox.port,
        inbox = %config.mailbox.inbox,
        done = %config.mailbox.done_folder,
        ignore_patterns = config.filter.patterns().len(),
        "voucher-inbox v{}",
        env!("CARGO_PKG_VERSION")
    );

    // ── Collaborators ────────────────────────────────────────────────────
    let uploader =
        LexofficeUploader::new(&config.upload).context("Failed to build upload client")?;
    let processor = Arc::new(MessageProcessor::new(
        config.filter.clone(),
        Arc::new(uploader),
        config.mailbox.inbox.clone(),
        config.mailbox.done_folder.clone(),
    ));
    let connector: Arc<dyn MailboxConnector> = Arc::new(ImapConnector::new(config.mailbox.clone()));

    if cli.once {
        info!("Running a single poll cycle");
        run_and_log(connector.as_ref(), &processor).await;
        return Ok(());
    }

    // ── Poll loop ────────────────────────────────────────────────────────
    let (handle, shutdown) = spawn_poller(config.poll_interval, connector, processor);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutdown requested");
    shutdown.store(true, std::sync::atomic::Ordering::Relaxed);
    handle.abort();

    Ok(())
}
