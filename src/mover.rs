//! Move transition: relocate a processed message into the done folder.
//!
//! ensure-folder → copy → flag `\Deleted` → expunge, four independent
//! store commands with no atomicity. A failure stops the transition at that
//! step and leaves the mailbox in one of these states:
//!
//! | failed step    | state left behind                                   |
//! |----------------|-----------------------------------------------------|
//! | ensure-folder  | message unmoved                                     |
//! | copy           | message unmoved                                     |
//! | flag-deleted   | copy in destination, original unflagged (re-upload next cycle) |
//! | expunge        | original flagged but present until the store purges it |

use tracing::{debug, info, warn};

use crate::error::{MailboxError, MoveError, MoveStep};
use crate::mailbox::{MailboxSession, Uid};

/// Make sure `folder` exists, creating it if needed.
///
/// Creation racing with another client is fine: if `CREATE` fails but the
/// folder exists afterwards, that counts as success.
pub async fn ensure_folder(
    session: &mut dyn MailboxSession,
    folder: &str,
) -> Result<(), MailboxError> {
    if session.folder_exists(folder).await? {
        return Ok(());
    }

    info!(folder, "Creating folder");
    match session.create_folder(folder).await {
        Ok(()) => Ok(()),
        Err(e) => {
            if session.folder_exists(folder).await? {
                debug!(folder, error = %e, "Folder appeared despite CREATE failure");
                Ok(())
            } else {
                Err(e)
            }
        }
    }
}

/// Move message `uid` from `source` into `destination`.
pub async fn mark_processed(
    session: &mut dyn MailboxSession,
    source: &str,
    uid: Uid,
    destination: &str,
) -> Result<(), MoveError> {
    let at = |step: MoveStep| move |source: MailboxError| MoveError { uid, step, source };

    ensure_folder(session, destination)
        .await
        .map_err(at(MoveStep::EnsureFolder))?;

    session
        .copy(source, uid, destination)
        .await
        .map_err(at(MoveStep::Copy))?;

    if let Err(e) = session.flag_deleted(source, uid).await {
        warn!(%uid, destination, "Copied but could not flag original; it will be reprocessed");
        return Err(at(MoveStep::FlagDeleted)(e));
    }

    session
        .expunge(source)
        .await
        .map_err(at(MoveStep::Expunge))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::{FailPoint, MailboxOp, MemoryMailbox};

    fn setup() -> (MemoryMailbox, Uid) {
        let mailbox = MemoryMailbox::new();
        let uid = mailbox.deliver("INBOX", "Subject: x\r\n\r\nbody");
        (mailbox, uid)
    }

    #[tokio::test]
    async fn moves_and_creates_missing_folder() {
        let (mailbox, uid) = setup();
        let mut session = mailbox.session();

        mark_processed(&mut session, "INBOX", uid, "done").await.unwrap();

        assert!(mailbox.has_folder("done"));
        assert_eq!(mailbox.count("INBOX"), 0);
        assert_eq!(mailbox.count("done"), 1);
        assert_eq!(
            mailbox.mutations(),
            vec![
                MailboxOp::CreateFolder("done".into()),
                MailboxOp::Copy {
                    uid,
                    destination: "done".into()
                },
                MailboxOp::FlagDeleted(uid),
                MailboxOp::Expunge("INBOX".into()),
            ]
        );
    }

    #[tokio::test]
    async fn existing_folder_is_not_recreated() {
        let (mailbox, uid) = setup();
        mailbox.add_folder("Done");
        let mut session = mailbox.session();

        mark_processed(&mut session, "INBOX", uid, "done").await.unwrap();

        assert!(
            !mailbox
                .mutations()
                .iter()
                .any(|op| matches!(op, MailboxOp::CreateFolder(_)))
        );
    }

    #[tokio::test]
    async fn concurrent_create_is_tolerated() {
        let mailbox = MemoryMailbox::new();
        mailbox.fail(FailPoint::CreateRace);
        let mut session = mailbox.session();

        ensure_folder(&mut session, "done").await.unwrap();
        assert!(mailbox.has_folder("done"));
    }

    #[tokio::test]
    async fn create_failure_without_folder_is_error() {
        let mailbox = MemoryMailbox::new();
        mailbox.fail(FailPoint::CreateFolder);
        let mut session = mailbox.session();

        assert!(ensure_folder(&mut session, "done").await.is_err());
        assert!(!mailbox.has_folder("done"));
    }

    #[tokio::test]
    async fn copy_failure_leaves_message_unmoved() {
        let (mailbox, uid) = setup();
        mailbox.fail(FailPoint::Copy(uid));
        let mut session = mailbox.session();

        let err = mark_processed(&mut session, "INBOX", uid, "done")
            .await
            .unwrap_err();

        assert_eq!(err.step, MoveStep::Copy);
        assert_eq!(err.uid, uid);
        assert_eq!(err.leftover_state(), "message unmoved");
        assert_eq!(mailbox.count("INBOX"), 1);
        assert!(!mailbox.is_flagged_deleted("INBOX", uid));
        assert_eq!(mailbox.count("done"), 0);
    }

    #[tokio::test]
    async fn flag_failure_leaves_orphan_copy() {
        let (mailbox, uid) = setup();
        mailbox.fail(FailPoint::FlagDeleted(uid));
        let mut session = mailbox.session();

        let err = mark_processed(&mut session, "INBOX", uid, "done")
            .await
            .unwrap_err();

        assert_eq!(err.step, MoveStep::FlagDeleted);
        assert_eq!(mailbox.count("done"), 1);
        assert_eq!(mailbox.count("INBOX"), 1);
        assert!(!mailbox.is_flagged_deleted("INBOX", uid));
        assert!(
            !mailbox
                .mutations()
                .iter()
                .any(|op| matches!(op, MailboxOp::Expunge(_)))
        );
    }

    #[tokio::test]
    async fn expunge_failure_leaves_flagged_original() {
        let (mailbox, uid) = setup();
        mailbox.fail(FailPoint::Expunge);
        let mut session = mailbox.session();

        let err = mark_processed(&mut session, "INBOX", uid, "done")
            .await
            .unwrap_err();

        assert_eq!(err.step, MoveStep::Expunge);
        assert!(mailbox.is_flagged_deleted("INBOX", uid));
        assert_eq!(mailbox.count("done"), 1);
        assert!(err.to_string().contains("expunge"));
    }

    #[tokio::test]
    async fn ensure_folder_failure_stops_before_copy() {
        let (mailbox, uid) = setup();
        mailbox.fail(FailPoint::FolderExists);
        let mut session = mailbox.session();

        let err = mark_processed(&mut session, "INBOX", uid, "done")
            .await
            .unwrap_err();

        assert_eq!(err.step, MoveStep::EnsureFolder);
        assert!(mailbox.mutations().is_empty());
    }
}
