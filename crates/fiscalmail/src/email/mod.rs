//! Mailbox access: IMAP sessions, message parsing and seen-message tracking.

pub mod client;
pub mod connector;
pub mod error;
pub mod parser;
pub mod tracker;

pub use client::ImapConnector;
pub use connector::{MailboxConnector, MailboxSession, MessageRef, RawMessage};
pub use error::EmailError;
pub use parser::{Attachment, AttachmentExtractor, MessageInfo, ParsedMessage};
pub use tracker::MessageTracker;
