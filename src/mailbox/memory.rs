//! In-memory mailbox store (for tests, behind the `test-util` feature).
//!
//! Mirrors the IMAP session semantics the pipeline relies on: explicit
//! folder selection, UID copy, `\Deleted` flags that only disappear on
//! expunge. Every session operation is recorded and any step can be made
//! to fail.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::MailboxError;
use crate::mailbox::{FolderStatus, MailboxConnector, MailboxSession, Uid};

/// A recorded session operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MailboxOp {
    Select(String),
    ListUids(String),
    FetchBody(Uid),
    FolderExists(String),
    CreateFolder(String),
    Copy { uid: Uid, destination: String },
    FlagDeleted(Uid),
    Expunge(String),
    Logout,
}

impl MailboxOp {
    /// Whether this operation changes mailbox state.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Self::CreateFolder(_) | Self::Copy { .. } | Self::FlagDeleted(_) | Self::Expunge(_)
        )
    }
}

/// Operation that should fail when attempted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FailPoint {
    Connect,
    Select,
    ListUids,
    FetchBody(Uid),
    FolderExists,
    CreateFolder,
    /// Another client creates the folder just before our `CREATE` lands.
    CreateRace,
    Copy(Uid),
    FlagDeleted(Uid),
    Expunge,
    Logout,
}

#[derive(Debug, Clone)]
struct StoredMessage {
    uid: Uid,
    raw: Vec<u8>,
    deleted: bool,
}

#[derive(Debug, Default)]
struct State {
    folders: BTreeMap<String, Vec<StoredMessage>>,
    next_uid: u32,
    failures: HashSet<FailPoint>,
    ops: Vec<MailboxOp>,
    sessions_opened: usize,
}

impl State {
    fn folder_key(&self, name: &str) -> Option<String> {
        self.folders
            .keys()
            .find(|k| k.eq_ignore_ascii_case(name))
            .cloned()
    }

    fn folder_mut(&mut self, name: &str) -> Result<&mut Vec<StoredMessage>, MailboxError> {
        let key = self.folder_key(name).ok_or_else(|| MailboxError::Command {
            command: "SELECT".into(),
            reason: format!("NO [NONEXISTENT] {name} does not exist"),
        })?;
        self.folders
            .get_mut(&key)
            .ok_or_else(|| MailboxError::Protocol(format!("folder {key} vanished")))
    }

    fn check(&self, point: FailPoint, command: &str) -> Result<(), MailboxError> {
        if self.failures.contains(&point) {
            return Err(MailboxError::Command {
                command: command.into(),
                reason: format!("NO injected failure at {point:?}"),
            });
        }
        Ok(())
    }

    fn assign_uid(&mut self) -> Uid {
        self.next_uid += 1;
        Uid(self.next_uid)
    }
}

/// Shared in-memory mailbox. Clones share the same store.
#[derive(Debug, Clone)]
pub struct MemoryMailbox {
    state: Arc<Mutex<State>>,
}

impl MemoryMailbox {
    /// Create a store containing an empty `INBOX`.
    pub fn new() -> Self {
        let mut state = State::default();
        state.folders.insert("INBOX".into(), Vec::new());
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("memory mailbox mutex poisoned")
    }

    pub fn add_folder(&self, name: &str) {
        let mut state = self.lock();
        if state.folder_key(name).is_none() {
            state.folders.insert(name.to_string(), Vec::new());
        }
    }

    /// Append a raw message to `folder` (created if missing).
    pub fn deliver(&self, folder: &str, raw: impl Into<Vec<u8>>) -> Uid {
        self.add_folder(folder);
        let mut state = self.lock();
        let uid = state.assign_uid();
        let key = state.folder_key(folder).unwrap_or_else(|| folder.to_string());
        state.folders.entry(key).or_default().push(StoredMessage {
            uid,
            raw: raw.into(),
            deleted: false,
        });
        uid
    }

    pub fn has_folder(&self, name: &str) -> bool {
        self.lock().folder_key(name).is_some()
    }

    /// UIDs present in `folder`, including ones flagged deleted.
    pub fn uids(&self, folder: &str) -> Vec<Uid> {
        let state = self.lock();
        state
            .folder_key(folder)
            .and_then(|k| state.folders.get(&k))
            .map(|msgs| msgs.iter().map(|m| m.uid).collect())
            .unwrap_or_default()
    }

    /// Number of messages in `folder`, including ones flagged deleted.
    pub fn count(&self, folder: &str) -> usize {
        self.uids(folder).len()
    }

    pub fn is_flagged_deleted(&self, folder: &str, uid: Uid) -> bool {
        let state = self.lock();
        state
            .folder_key(folder)
            .and_then(|k| state.folders.get(&k))
            .and_then(|msgs| msgs.iter().find(|m| m.uid == uid))
            .is_some_and(|m| m.deleted)
    }

    /// Make `point` fail until cleared.
    pub fn fail(&self, point: FailPoint) {
        self.lock().failures.insert(point);
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Every operation recorded so far, in order.
    pub fn ops(&self) -> Vec<MailboxOp> {
        self.lock().ops.clone()
    }

    /// Recorded operations that change mailbox state.
    pub fn mutations(&self) -> Vec<MailboxOp> {
        self.lock()
            .ops
            .iter()
            .filter(|op| op.is_mutation())
            .cloned()
            .collect()
    }

    pub fn clear_ops(&self) {
        self.lock().ops.clear();
    }

    pub fn sessions_opened(&self) -> usize {
        self.lock().sessions_opened
    }

    /// Open a session directly, bypassing the connector.
    pub fn session(&self) -> MemorySession {
        self.lock().sessions_opened += 1;
        MemorySession {
            mailbox: self.clone(),
            selected: None,
            logged_out: false,
        }
    }
}

impl Default for MemoryMailbox {
    fn default() -> Self {
        Self::new()
    }
}

/// Connector handing out sessions on a shared `MemoryMailbox`.
pub struct MemoryMailboxConnector {
    mailbox: MemoryMailbox,
}

impl MemoryMailboxConnector {
    pub fn new(mailbox: MemoryMailbox) -> Self {
        Self { mailbox }
    }
}

#[async_trait]
impl MailboxConnector for MemoryMailboxConnector {
    async fn connect(&self) -> Result<Box<dyn MailboxSession>, MailboxError> {
        if self.mailbox.lock().failures.contains(&FailPoint::Connect) {
            return Err(MailboxError::Connect {
                host: "memory".into(),
                port: 0,
                reason: "injected failure".into(),
            });
        }
        Ok(Box::new(self.mailbox.session()))
    }
}

/// Session on a `MemoryMailbox`.
pub struct MemorySession {
    mailbox: MemoryMailbox,
    selected: Option<String>,
    logged_out: bool,
}

impl MemorySession {
    fn state(&self) -> Result<MutexGuard<'_, State>, MailboxError> {
        if self.logged_out {
            return Err(MailboxError::Disconnected);
        }
        Ok(self.mailbox.lock())
    }

    fn ensure_selected(&mut self, folder: &str) -> Result<(), MailboxError> {
        if self.selected.as_deref() == Some(folder) {
            return Ok(());
        }
        self.select_sync(folder).map(|_| ())
    }

    fn select_sync(&mut self, folder: &str) -> Result<FolderStatus, MailboxError> {
        self.selected = None;
        let mut state = self.state()?;
        state.ops.push(MailboxOp::Select(folder.to_string()));
        state.check(FailPoint::Select, "SELECT")?;
        let exists = state.folder_mut(folder)?.len() as u32;
        drop(state);
        self.selected = Some(folder.to_string());
        Ok(FolderStatus { exists })
    }
}

#[async_trait]
impl MailboxSession for MemorySession {
    fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    async fn select(&mut self, folder: &str) -> Result<FolderStatus, MailboxError> {
        self.select_sync(folder)
    }

    async fn list_uids(&mut self, folder: &str) -> Result<Vec<Uid>, MailboxError> {
        self.ensure_selected(folder)?;
        let mut state = self.state()?;
        state.ops.push(MailboxOp::ListUids(folder.to_string()));
        state.check(FailPoint::ListUids, "UID SEARCH")?;
        Ok(state.folder_mut(folder)?.iter().map(|m| m.uid).collect())
    }

    async fn fetch_body(&mut self, folder: &str, uid: Uid) -> Result<Vec<u8>, MailboxError> {
        self.ensure_selected(folder)?;
        let mut state = self.state()?;
        state.ops.push(MailboxOp::FetchBody(uid));
        state.check(FailPoint::FetchBody(uid), "UID FETCH")?;
        state
            .folder_mut(folder)?
            .iter()
            .find(|m| m.uid == uid)
            .map(|m| m.raw.clone())
            .ok_or_else(|| MailboxError::NotFound {
                folder: folder.to_string(),
                uid,
            })
    }

    async fn folder_exists(&mut self, name: &str) -> Result<bool, MailboxError> {
        let mut state = self.state()?;
        state.ops.push(MailboxOp::FolderExists(name.to_string()));
        state.check(FailPoint::FolderExists, "LIST")?;
        Ok(state.folder_key(name).is_some())
    }

    async fn create_folder(&mut self, name: &str) -> Result<(), MailboxError> {
        let mut state = self.state()?;
        state.ops.push(MailboxOp::CreateFolder(name.to_string()));
        state.check(FailPoint::CreateFolder, "CREATE")?;
        if state.failures.contains(&FailPoint::CreateRace) && state.folder_key(name).is_none() {
            state.folders.insert(name.to_string(), Vec::new());
        }
        if state.folder_key(name).is_some() {
            return Err(MailboxError::Command {
                command: "CREATE".into(),
                reason: format!("NO [ALREADYEXISTS] {name} already exists"),
            });
        }
        state.folders.insert(name.to_string(), Vec::new());
        Ok(())
    }

    async fn copy(
        &mut self,
        folder: &str,
        uid: Uid,
        destination: &str,
    ) -> Result<(), MailboxError> {
        self.ensure_selected(folder)?;
        let mut state = self.state()?;
        state.ops.push(MailboxOp::Copy {
            uid,
            destination: destination.to_string(),
        });
        state.check(FailPoint::Copy(uid), "UID COPY")?;
        let raw = state
            .folder_mut(folder)?
            .iter()
            .find(|m| m.uid == uid)
            .map(|m| m.raw.clone())
            .ok_or_else(|| MailboxError::NotFound {
                folder: folder.to_string(),
                uid,
            })?;
        if state.folder_key(destination).is_none() {
            return Err(MailboxError::Command {
                command: "UID COPY".into(),
                reason: format!("NO [TRYCREATE] {destination} does not exist"),
            });
        }
        let copy_uid = state.assign_uid();
        state.folder_mut(destination)?.push(StoredMessage {
            uid: copy_uid,
            raw,
            deleted: false,
        });
        Ok(())
    }

    async fn flag_deleted(&mut self, folder: &str, uid: Uid) -> Result<(), MailboxError> {
        self.ensure_selected(folder)?;
        let mut state = self.state()?;
        state.ops.push(MailboxOp::FlagDeleted(uid));
        state.check(FailPoint::FlagDeleted(uid), "UID STORE")?;
        let message = state
            .folder_mut(folder)?
            .iter_mut()
            .find(|m| m.uid == uid)
            .ok_or_else(|| MailboxError::NotFound {
                folder: folder.to_string(),
                uid,
            })?;
        message.deleted = true;
        Ok(())
    }

    async fn expunge(&mut self, folder: &str) -> Result<(), MailboxError> {
        self.ensure_selected(folder)?;
        let mut state = self.state()?;
        state.ops.push(MailboxOp::Expunge(folder.to_string()));
        state.check(FailPoint::Expunge, "EXPUNGE")?;
        state.folder_mut(folder)?.retain(|m| !m.deleted);
        Ok(())
    }

    async fn logout(&mut self) -> Result<(), MailboxError> {
        let mut state = self.state()?;
        state.ops.push(MailboxOp::Logout);
        let result = state.check(FailPoint::Logout, "LOGOUT");
        drop(state);
        self.logged_out = true;
        self.selected = None;
        result
    }
}
