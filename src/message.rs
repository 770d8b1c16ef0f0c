//! MIME part extraction on top of `mail-parser`.
//!
//! Every leaf part of a message is classified as either body content or an
//! attachment. A part is an attachment unless its disposition is `inline`,
//! or it carries no `attachment` disposition and has a `text/*` type.

use mail_parser::{Message, MessageParser, MimeHeaders, PartType};

/// Classification of one MIME part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartKind {
    /// `multipart/*` container; its children are visited separately.
    Container,
    Body,
    Attachment,
}

/// A leaf part of a parsed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessagePart<'a> {
    Body,
    Attachment(AttachmentPart<'a>),
}

/// An attachment: original filename plus decoded payload borrowed from the
/// parsed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentPart<'a> {
    /// Empty when the sender did not name the file.
    pub filename: String,
    payload: &'a [u8],
}

impl<'a> AttachmentPart<'a> {
    pub fn new(filename: impl Into<String>, payload: &'a [u8]) -> Self {
        Self {
            filename: filename.into(),
            payload,
        }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Copy the payload out for upload.
    pub fn read_payload(&self) -> Vec<u8> {
        self.payload.to_vec()
    }
}

/// Parse a raw RFC 822 message. `None` if the bytes are not a message.
pub fn parse_message(raw: &[u8]) -> Option<Message<'_>> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return None;
    }
    MessageParser::default().parse(raw)
}

/// Classify one part according to its headers.
pub fn classify(part: &mail_parser::MessagePart<'_>) -> PartKind {
    if matches!(part.body, PartType::Multipart(_)) {
        return PartKind::Container;
    }
    if let Some(disposition) = part.content_disposition() {
        if disposition.ctype().eq_ignore_ascii_case("inline") {
            return PartKind::Body;
        }
        if disposition.ctype().eq_ignore_ascii_case("attachment") {
            return PartKind::Attachment;
        }
    }
    match part.content_type() {
        Some(ct) if !ct.ctype().eq_ignore_ascii_case("text") => PartKind::Attachment,
        _ => PartKind::Body,
    }
}

/// Leaf parts of `message` in parser order, containers skipped.
pub fn message_parts<'a>(message: &'a Message<'_>) -> impl Iterator<Item = MessagePart<'a>> + 'a {
    message
        .parts
        .iter()
        .filter_map(|part| match classify(part) {
            PartKind::Container => None,
            PartKind::Body => Some(MessagePart::Body),
            PartKind::Attachment => Some(MessagePart::Attachment(AttachmentPart::new(
                part.attachment_name().unwrap_or_default(),
                part.contents(),
            ))),
        })
}
