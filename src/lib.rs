//! Voucher inbox: mailbox attachments into the Lexoffice document inbox.

pub mod config;
pub mod error;
pub mod filter;
pub mod mailbox;
pub mod message;
pub mod mover;
pub mod poller;
pub mod processor;
pub mod upload;
