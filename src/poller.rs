//! Poll driver: one mailbox session per cycle.
//!
//! Each cycle connects, selects the inbox, lists every message once and
//! hands them to the `MessageProcessor` one at a time. A failing message
//! is logged and counted; it never stops the rest of the batch. Nothing is
//! carried from one cycle to the next.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::MailboxError;
use crate::mailbox::{MailboxConnector, MailboxSession};
use crate::processor::{MessageProcessor, ProcessingOutcome};

/// Counters for one poll cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// Messages listed in the inbox.
    pub messages: usize,
    pub moved: usize,
    pub no_attachments: usize,
    /// Left in the inbox because an upload failed.
    pub retry_later: usize,
    pub move_failed: usize,
    /// Fetch or parse failures.
    pub errors: usize,
    pub uploaded: usize,
    pub skipped: usize,
}

impl CycleReport {
    fn record(&mut self, outcome: &ProcessingOutcome) {
        match outcome {
            ProcessingOutcome::NoAttachments => self.no_attachments += 1,
            ProcessingOutcome::Moved(_) => self.moved += 1,
            ProcessingOutcome::UploadsFailed(_) => self.retry_later += 1,
            ProcessingOutcome::MoveFailed { .. } => self.move_failed += 1,
        }
        if let Some(tally) = outcome.tally() {
            self.uploaded += tally.uploaded.len();
            self.skipped += tally.skipped.len();
        }
    }
}

/// Run one poll cycle against the processor's source folder.
///
/// Connect, select and list failures abort the cycle and are returned.
/// The session is logged out whenever it was opened.
pub async fn run_cycle(
    connector: &dyn MailboxConnector,
    processor: &MessageProcessor,
) -> Result<CycleReport, MailboxError> {
    let mut session = connector.connect().await?;
    debug!("Mailbox session opened");

    let result = process_inbox(session.as_mut(), processor).await;

    if let Err(e) = session.logout().await {
        warn!("Logout failed: {e}");
    }

    result
}

async fn process_inbox(
    session: &mut dyn MailboxSession,
    processor: &MessageProcessor,
) -> Result<CycleReport, MailboxError> {
    let inbox = processor.source_folder();
    let status = session.select(inbox).await?;
    if status.exists == 0 {
        info!(folder = inbox, "No messages to process");
        return Ok(CycleReport::default());
    }

    let uids = session.list_uids(inbox).await?;
    info!(folder = inbox, count = uids.len(), "Processing messages");

    let mut report = CycleReport {
        messages: uids.len(),
        ..CycleReport::default()
    };

    for uid in uids {
        match processor.process(session, uid).await {
            Ok(outcome) => {
                debug!(%uid, outcome = outcome.label(), "Message processed");
                report.record(&outcome);
            }
            Err(e) => {
                error!(%uid, "Error processing message: {e}");
                report.errors += 1;
            }
        }
    }

    Ok(report)
}

/// Run one cycle, logging its summary or the error that aborted it.
pub async fn run_and_log(
    connector: &dyn MailboxConnector,
    processor: &MessageProcessor,
) -> Option<CycleReport> {
    match run_cycle(connector, processor).await {
        Ok(report) => {
            info!(
                messages = report.messages,
                moved = report.moved,
                uploaded = report.uploaded,
                retry_later = report.retry_later,
                move_failed = report.move_failed,
                errors = report.errors,
                "Poll cycle finished"
            );
            Some(report)
        }
        Err(e) => {
            error!("Poll cycle aborted: {e}");
            None
        }
    }
}

/// Spawn a background task that runs a cycle now and then once per `interval`.
///
/// Returns a `JoinHandle` and a shutdown flag. Set the flag to stop polling.
pub fn spawn_poller(
    interval: Duration,
    connector: Arc<dyn MailboxConnector>,
    processor: Arc<MessageProcessor>,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!(
            "Poller started, polling {} every {}s",
            processor.source_folder(),
            interval.as_secs()
        );

        let mut tick = tokio::time::interval(interval);
        // A cycle outlasting the interval must not trigger a burst of catch-up cycles.
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Poller shutting down");
                return;
            }

            run_and_log(connector.as_ref(), &processor).await;
        }
    });

    (handle, shutdown_flag)
}
