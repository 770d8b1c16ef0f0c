//! Mailbox session abstraction.
//!
//! A session is stateful: the store acts on "the currently selected
//! folder". Every folder-scoped operation therefore names the folder it
//! targets and implementations re-select when the session is elsewhere.

pub mod imap;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;

use std::fmt;

use async_trait::async_trait;

use crate::error::MailboxError;

pub use imap::{ImapConnector, ImapSession};
#[cfg(any(test, feature = "test-util"))]
pub use memory::{FailPoint, MailboxOp, MemoryMailbox, MemoryMailboxConnector, MemorySession};

/// Store-assigned message identifier, stable within one poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Uid(pub u32);

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of selecting a folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FolderStatus {
    /// Number of messages currently in the folder.
    pub exists: u32,
}

/// An authenticated mailbox session.
#[async_trait]
pub trait MailboxSession: Send {
    /// Folder the session currently operates on, if any.
    fn selected(&self) -> Option<&str>;

    /// Select `folder`, making it the target of subsequent commands.
    async fn select(&mut self, folder: &str) -> Result<FolderStatus, MailboxError>;

    /// List the UIDs of every message in `folder` with one command.
    async fn list_uids(&mut self, folder: &str) -> Result<Vec<Uid>, MailboxError>;

    /// Fetch the full raw message without altering its flags.
    async fn fetch_body(&mut self, folder: &str, uid: Uid) -> Result<Vec<u8>, MailboxError>;

    /// Whether a folder named `name` exists (case-insensitive).
    async fn folder_exists(&mut self, name: &str) -> Result<bool, MailboxError>;

    async fn create_folder(&mut self, name: &str) -> Result<(), MailboxError>;

    /// Copy message `uid` of `folder` into `destination`.
    async fn copy(&mut self, folder: &str, uid: Uid, destination: &str)
    -> Result<(), MailboxError>;

    /// Add the `\Deleted` flag to message `uid` of `folder`.
    async fn flag_deleted(&mut self, folder: &str, uid: Uid) -> Result<(), MailboxError>;

    /// Permanently remove every `\Deleted` message in `folder`.
    async fn expunge(&mut self, folder: &str) -> Result<(), MailboxError>;

    async fn logout(&mut self) -> Result<(), MailboxError>;
}

/// Opens authenticated sessions. One session per poll cycle.
#[async_trait]
pub trait MailboxConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn MailboxSession>, MailboxError>;
}
