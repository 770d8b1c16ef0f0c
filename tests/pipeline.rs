//! End-to-end poll cycles over the in-memory mailbox.
//!
//! Drives `run_cycle` with a recording uploader and checks which uploads
//! and which mailbox mutations each cycle produces.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use voucher_inbox::error::UploadError;
use voucher_inbox::filter::AttachmentFilter;
use voucher_inbox::mailbox::{FailPoint, MailboxOp, MemoryMailbox, MemoryMailboxConnector, Uid};
use voucher_inbox::poller::run_cycle;
use voucher_inbox::processor::MessageProcessor;
use voucher_inbox::upload::Uploader;

/// Records every upload attempt; fails for filenames in `failing`.
#[derive(Default)]
struct RecordingUploader {
    attempts: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
}

impl RecordingUploader {
    fn fail_for(&self, filename: &str) {
        self.failing.lock().unwrap().insert(filename.to_string());
    }

    fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }

    fn attempts(&self) -> Vec<String> {
        self.attempts.lock().unwrap().clone()
    }

    fn clear(&self) {
        self.attempts.lock().unwrap().clear();
    }
}

#[async_trait]
impl Uploader for RecordingUploader {
    async fn upload(&self, filename: &str, _payload: Vec<u8>) -> Result<(), UploadError> {
        self.attempts.lock().unwrap().push(filename.to_string());
        if self.failing.lock().unwrap().contains(filename) {
            return Err(UploadError::Rejected {
                status: 500,
                body: "internal error".into(),
            });
        }
        Ok(())
    }
}

struct Harness {
    mailbox: MemoryMailbox,
    connector: MemoryMailboxConnector,
    uploader: Arc<RecordingUploader>,
    processor: MessageProcessor,
}

impl Harness {
    fn new() -> Self {
        let mailbox = MemoryMailbox::new();
        let uploader = Arc::new(RecordingUploader::default());
        let processor = MessageProcessor::new(
            AttachmentFilter::default(),
            uploader.clone(),
            "INBOX",
            "done",
        );
        Self {
            connector: MemoryMailboxConnector::new(mailbox.clone()),
            mailbox,
            uploader,
            processor,
        }
    }

    fn deliver(&self, subject: &str, attachments: &[&str]) -> Uid {
        self.mailbox.deliver("INBOX", raw_message(subject, attachments))
    }

    fn moves(&self) -> Vec<Uid> {
        self.mailbox
            .mutations()
            .into_iter()
            .filter_map(|op| match op {
                MailboxOp::Copy { uid, .. } => Some(uid),
                _ => None,
            })
            .collect()
    }
}

fn raw_message(subject: &str, attachments: &[&str]) -> String {
    if attachments.is_empty() {
        return format!(
            "From: sender@example.com\r\nSubject: {subject}\r\nContent-Type: text/plain\r\n\r\nNo files here.\r\n"
        );
    }
    let mut raw = format!(
        "From: sender@example.com\r\nSubject: {subject}\r\nMIME-Version: 1.0\r\nContent-Type: multipart/mixed; boundary=\"part\"\r\n\r\n--part\r\nContent-Type: text/plain\r\n\r\nPlease find attached.\r\n"
    );
    for name in attachments {
        raw.push_str(&format!(
            "--part\r\nContent-Type: application/pdf; name=\"{name}\"\r\nContent-Disposition: attachment; filename=\"{name}\"\r\nContent-Transfer-Encoding: base64\r\n\r\nJVBERi0xLjQ=\r\n"
        ));
    }
    raw.push_str("--part--\r\n");
    raw
}

#[tokio::test]
async fn invoice_is_uploaded_and_moved_plain_mail_stays() {
    let h = Harness::new();
    let m1 = h.deliver("Invoice 117", &["invoice.pdf"]);
    let m2 = h.deliver("Lunch?", &[]);

    let report = run_cycle(&h.connector, &h.processor).await.unwrap();

    assert_eq!(h.uploader.attempts(), vec!["invoice.pdf"]);
    assert_eq!(h.moves(), vec![m1]);
    assert_eq!(
        h.mailbox.mutations(),
        vec![
            MailboxOp::CreateFolder("done".into()),
            MailboxOp::Copy {
                uid: m1,
                destination: "done".into()
            },
            MailboxOp::FlagDeleted(m1),
            MailboxOp::Expunge("INBOX".into()),
        ]
    );
    assert_eq!(h.mailbox.uids("INBOX"), vec![m2]);
    assert_eq!(report.moved, 1);
    assert_eq!(report.no_attachments, 1);
}

#[tokio::test]
async fn failed_upload_keeps_message_and_skips_filtered_attachment() {
    let h = Harness::new();
    h.uploader.fail_for("receipt.pdf");
    let m3 = h.deliver("Order confirmation", &["AGB_terms.pdf", "receipt.pdf"]);

    let report = run_cycle(&h.connector, &h.processor).await.unwrap();

    assert_eq!(h.uploader.attempts(), vec!["receipt.pdf"]);
    assert!(h.mailbox.mutations().is_empty());
    assert_eq!(h.mailbox.uids("INBOX"), vec![m3]);
    assert!(!h.mailbox.is_flagged_deleted("INBOX", m3));
    assert_eq!(report.retry_later, 1);
}

#[tokio::test]
async fn failed_message_is_retried_whole_next_cycle() {
    let h = Harness::new();
    h.uploader.fail_for("b.pdf");
    let uid = h.deliver("Two files", &["a.pdf", "b.pdf"]);

    run_cycle(&h.connector, &h.processor).await.unwrap();
    assert_eq!(h.uploader.attempts(), vec!["a.pdf", "b.pdf"]);
    assert!(h.moves().is_empty());

    h.uploader.heal();
    h.uploader.clear();
    run_cycle(&h.connector, &h.processor).await.unwrap();

    // No per-attachment memory: the already uploaded file goes again.
    assert_eq!(h.uploader.attempts(), vec!["a.pdf", "b.pdf"]);
    assert_eq!(h.moves(), vec![uid]);
    assert_eq!(h.mailbox.count("INBOX"), 0);
}

#[tokio::test]
async fn fetch_failure_on_first_message_does_not_stop_second() {
    let h = Harness::new();
    let a = h.deliver("A", &["a.pdf"]);
    let b = h.deliver("B", &["b.pdf"]);
    h.mailbox.fail(FailPoint::FetchBody(a));

    let report = run_cycle(&h.connector, &h.processor).await.unwrap();

    assert_eq!(report.errors, 1);
    assert_eq!(h.uploader.attempts(), vec!["b.pdf"]);
    assert_eq!(h.moves(), vec![b]);
    assert_eq!(h.mailbox.uids("INBOX"), vec![a]);
}

#[tokio::test]
async fn unparseable_first_message_does_not_stop_second() {
    let h = Harness::new();
    let broken = h.mailbox.deliver("INBOX", "");
    let b = h.deliver("B", &["b.pdf"]);

    let report = run_cycle(&h.connector, &h.processor).await.unwrap();

    assert_eq!(report.errors, 1);
    assert_eq!(report.moved, 1);
    assert_eq!(h.uploader.attempts(), vec!["b.pdf"]);
    assert_eq!(h.moves(), vec![b]);
    assert_eq!(h.mailbox.uids("INBOX"), vec![broken]);
}

#[tokio::test]
async fn upload_failure_on_first_message_does_not_stop_second() {
    let h = Harness::new();
    h.uploader.fail_for("a.pdf");
    let a = h.deliver("A", &["a.pdf"]);
    let b = h.deliver("B", &["b.pdf"]);

    run_cycle(&h.connector, &h.processor).await.unwrap();

    assert_eq!(h.uploader.attempts(), vec!["a.pdf", "b.pdf"]);
    assert_eq!(h.moves(), vec![b]);
    assert_eq!(h.mailbox.uids("INBOX"), vec![a]);
}

#[tokio::test]
async fn move_failure_does_not_stop_second_message() {
    let h = Harness::new();
    let a = h.deliver("A", &["a.pdf"]);
    let b = h.deliver("B", &["b.pdf"]);
    h.mailbox.fail(FailPoint::Copy(a));

    let report = run_cycle(&h.connector, &h.processor).await.unwrap();

    assert_eq!(report.move_failed, 1);
    assert_eq!(report.moved, 1);
    assert_eq!(h.mailbox.uids("INBOX"), vec![a]);
    assert_eq!(h.mailbox.count("done"), 1);
    assert!(h.moves().contains(&b));
}

#[tokio::test]
async fn second_cycle_on_emptied_inbox_does_nothing() {
    let h = Harness::new();
    h.deliver("Invoice", &["invoice.pdf"]);
    h.deliver("Credit note", &["credit.pdf", "event.ics"]);

    run_cycle(&h.connector, &h.processor).await.unwrap();
    assert_eq!(h.mailbox.count("INBOX"), 0);

    h.uploader.clear();
    h.mailbox.clear_ops();
    let report = run_cycle(&h.connector, &h.processor).await.unwrap();

    assert!(h.uploader.attempts().is_empty());
    assert!(h.mailbox.mutations().is_empty());
    assert_eq!(report.messages, 0);
}

#[tokio::test]
async fn connect_failure_performs_no_work() {
    let h = Harness::new();
    h.deliver("Invoice", &["invoice.pdf"]);
    h.mailbox.fail(FailPoint::Connect);

    assert!(run_cycle(&h.connector, &h.processor).await.is_err());
    assert!(h.uploader.attempts().is_empty());
    assert!(h.mailbox.ops().is_empty());
    assert_eq!(h.mailbox.count("INBOX"), 1);
}

#[tokio::test]
async fn list_failure_aborts_cycle_and_logs_out() {
    let h = Harness::new();
    h.deliver("Invoice", &["invoice.pdf"]);
    h.mailbox.fail(FailPoint::ListUids);

    assert!(run_cycle(&h.connector, &h.processor).await.is_err());
    assert!(h.uploader.attempts().is_empty());
    assert_eq!(h.mailbox.ops().last(), Some(&MailboxOp::Logout));
}

#[tokio::test]
async fn existing_done_folder_is_reused() {
    let h = Harness::new();
    h.mailbox.add_folder("done");
    let uid = h.deliver("Invoice", &["invoice.pdf"]);

    run_cycle(&h.connector, &h.processor).await.unwrap();

    assert_eq!(
        h.mailbox.mutations(),
        vec![
            MailboxOp::Copy {
                uid,
                destination: "done".into()
            },
            MailboxOp::FlagDeleted(uid),
            MailboxOp::Expunge("INBOX".into()),
        ]
    );
}
