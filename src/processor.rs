//! Message processor: one message from fetch to move.
//!
//! 1. Fetch the full message by UID
//! 2. Walk every MIME part; body parts are passed over
//! 3. Each attachment is filtered, then uploaded (one attempt)
//! 4. Move the message to the done folder only if no upload failed
//!
//! A message with a failed upload stays in the inbox untouched and is
//! retried as a whole on the next cycle.

use std::sync::Arc;

use mail_parser::Message;
use tracing::{debug, error, info, warn};

use crate::error::{MoveError, ProcessError, UploadError};
use crate::filter::AttachmentFilter;
use crate::mailbox::{MailboxSession, Uid};
use crate::message::{MessagePart, message_parts, parse_message};
use crate::mover::mark_processed;
use crate::upload::Uploader;

/// An attachment whose upload failed.
#[derive(Debug)]
pub struct AttachmentFailure {
    pub filename: String,
    pub error: UploadError,
}

/// Per-attachment results for one message.
#[derive(Debug, Default)]
pub struct AttachmentTally {
    pub uploaded: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<AttachmentFailure>,
}

impl AttachmentTally {
    /// Number of attachment parts observed.
    pub fn seen(&self) -> usize {
        self.uploaded.len() + self.skipped.len() + self.failed.len()
    }

    pub fn all_uploaded(&self) -> bool {
        self.failed.is_empty()
    }
}

/// What happened to one message.
#[derive(Debug)]
pub enum ProcessingOutcome {
    /// No attachment parts; mailbox untouched.
    NoAttachments,
    /// Every non-skipped attachment uploaded and the message was moved.
    Moved(AttachmentTally),
    /// At least one upload failed; mailbox untouched.
    UploadsFailed(AttachmentTally),
    /// Uploads succeeded but the move transition did not complete.
    MoveFailed {
        tally: AttachmentTally,
        error: MoveError,
    },
}

impl ProcessingOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::NoAttachments => "no-attachments",
            Self::Moved(_) => "moved",
            Self::UploadsFailed(_) => "uploads-failed",
            Self::MoveFailed { .. } => "move-failed",
        }
    }

    pub fn tally(&self) -> Option<&AttachmentTally> {
        match self {
            Self::NoAttachments => None,
            Self::Moved(tally) | Self::UploadsFailed(tally) | Self::MoveFailed { tally, .. } => {
                Some(tally)
            }
        }
    }
}

/// Runs messages through filter → upload → move.
pub struct MessageProcessor {
    filter: AttachmentFilter,
    uploader: Arc<dyn Uploader>,
    source_folder: String,
    done_folder: String,
}

impl MessageProcessor {
    pub fn new(
        filter: AttachmentFilter,
        uploader: Arc<dyn Uploader>,
        source_folder: impl Into<String>,
        done_folder: impl Into<String>,
    ) -> Self {
        Self {
            filter,
            uploader,
            source_folder: source_folder.into(),
            done_folder: done_folder.into(),
        }
    }

    /// Folder messages are read from.
    pub fn source_folder(&self) -> &str {
        &self.source_folder
    }

    pub fn done_folder(&self) -> &str {
        &self.done_folder
    }

    /// Process message `uid` of the source folder.
    ///
    /// Fetch and parse failures abort this message only. Upload and move
    /// failures are reported through the outcome.
    pub async fn process(
        &self,
        session: &mut dyn MailboxSession,
        uid: Uid,
    ) -> Result<ProcessingOutcome, ProcessError> {
        debug!(%uid, "Processing message");

        let raw = session
            .fetch_body(&self.source_folder, uid)
            .await
            .map_err(|source| ProcessError::Fetch { uid, source })?;

        let tally = {
            let message = parse_message(&raw).ok_or(ProcessError::Parse { uid })?;
            self.upload_attachments(uid, &message).await
        };

        if tally.seen() == 0 {
            info!(%uid, "Message has no attachments, skipping");
            return Ok(ProcessingOutcome::NoAttachments);
        }

        if !tally.all_uploaded() {
            warn!(
                %uid,
                failed = tally.failed.len(),
                uploaded = tally.uploaded.len(),
                "Upload failures, leaving message for next cycle"
            );
            return Ok(ProcessingOutcome::UploadsFailed(tally));
        }

        match mark_processed(session, &self.source_folder, uid, &self.done_folder).await {
            Ok(()) => {
                info!(%uid, folder = %self.done_folder, "Moved message");
                Ok(ProcessingOutcome::Moved(tally))
            }
            Err(error) => {
                error!(
                    %uid,
                    step = %error.step,
                    state = error.leftover_state(),
                    "Failed to move message: {error}"
                );
                Ok(ProcessingOutcome::MoveFailed { tally, error })
            }
        }
    }

    /// Filter and upload every attachment; one failure never stops the rest.
    async fn upload_attachments(&self, uid: Uid, message: &Message<'_>) -> AttachmentTally {
        let mut tally = AttachmentTally::default();

        for part in message_parts(message) {
            let MessagePart::Attachment(attachment) = part else {
                continue;
            };
            let filename = attachment.filename.clone();
            debug!(%uid, filename = %filename, size = attachment.len(), "Found attachment");

            if let Some(pattern) = self.filter.matching_pattern(&filename) {
                info!(%uid, filename = %filename, pattern = %pattern.pattern, "Skipping attachment (matches ignore pattern)");
                tally.skipped.push(filename);
                continue;
            }

            match self.uploader.upload(&filename, attachment.read_payload()).await {
                Ok(()) => {
                    info!(%uid, filename = %filename, "Uploaded attachment");
                    tally.uploaded.push(filename);
                }
                Err(e) => {
                    error!(%uid, filename = %filename, "Failed to upload attachment: {e}");
                    tally.failed.push(AttachmentFailure { filename, error: e });
                }
            }
        }

        tally
    }
}
