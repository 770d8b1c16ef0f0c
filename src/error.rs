//! Error types for voucher-inbox.
//!
//! One enum per failure level: startup configuration, mailbox protocol,
//! per-message processing, per-attachment upload, and the move transition.

use std::fmt;

use crate::mailbox::Uid;

/// Configuration-related errors. Always fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

impl ConfigError {
    /// Extra guidance for the operator, where there is any.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::MissingEnvVar(_) => {
                Some("Required: IMAP_SERVER, IMAP_USER, IMAP_PASSWORD, LEXOFFICE_API_KEY")
            }
            Self::InvalidValue { .. } => None,
        }
    }
}

/// Mailbox session errors.
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("Failed to connect to {host}:{port}: {reason}")]
    Connect {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Login failed for {user}: {reason}")]
    AuthFailed { user: String, reason: String },

    #[error("{command} failed: {reason}")]
    Command { command: String, reason: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Mailbox session is not connected")]
    Disconnected,

    #[error("Message {uid} not found in {folder}")]
    NotFound { folder: String, uid: Uid },
}

/// Message-level errors: the message is abandoned for this cycle.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Failed to fetch message {uid}: {source}")]
    Fetch {
        uid: Uid,
        #[source]
        source: MailboxError,
    },

    #[error("Failed to parse message {uid}")]
    Parse { uid: Uid },
}

/// Attachment-level upload errors.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Upload request failed: {0}")]
    Transport(String),

    #[error("Upload rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

impl From<reqwest::Error> for UploadError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

/// Step of the move transition that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveStep {
    EnsureFolder,
    Copy,
    FlagDeleted,
    Expunge,
}

impl MoveStep {
    pub fn label(self) -> &'static str {
        match self {
            Self::EnsureFolder => "ensure-folder",
            Self::Copy => "copy",
            Self::FlagDeleted => "flag-deleted",
            Self::Expunge => "expunge",
        }
    }
}

impl fmt::Display for MoveStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Mutation-level error: which step of moving `uid` failed.
#[derive(Debug, thiserror::Error)]
#[error("Moving message {uid} failed at {step}: {source}")]
pub struct MoveError {
    pub uid: Uid,
    pub step: MoveStep,
    #[source]
    pub source: MailboxError,
}

impl MoveError {
    /// Mailbox state left behind by a failure at this step.
    pub fn leftover_state(&self) -> &'static str {
        match self.step {
            MoveStep::EnsureFolder | MoveStep::Copy => "message unmoved",
            MoveStep::FlagDeleted => "copied to destination but original not flagged",
            MoveStep::Expunge => "original flagged deleted but not expunged",
        }
    }
}
