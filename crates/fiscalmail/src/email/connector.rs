//! The mailbox contract the ingestion runner drives.
//!
//! A connector opens one session per source run. Sessions expose the
//! four-call surface (`search`, `fetch`, `delete`, `close`) plus the folder's
//! UIDVALIDITY. `close` must be safe to call more than once.

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::db::MailboxSource;

use super::error::Result;

/// Identifies a message within the currently open folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageRef {
    pub uid: u32,
}

impl MessageRef {
    pub fn new(uid: u32) -> Self {
        Self { uid }
    }
}

/// A fetched RFC 822 message.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub uid: u32,
    pub bytes: Vec<u8>,
}

/// Opens mailbox sessions.
#[async_trait]
pub trait MailboxConnector: Send + Sync {
    /// Connects, authenticates and opens the source's folder.
    async fn connect(&self, source: &MailboxSource) -> Result<Box<dyn MailboxSession>>;
}

/// An open mailbox folder.
#[async_trait]
pub trait MailboxSession: Send {
    /// UIDVALIDITY of the open folder.
    fn uid_validity(&self) -> u32;

    /// Lists messages, optionally only those received on or after `since`.
    /// Results are in ascending uid order.
    async fn search(&mut self, since: Option<NaiveDate>) -> Result<Vec<MessageRef>>;

    async fn fetch(&mut self, message: MessageRef) -> Result<RawMessage>;

    /// Flags a message for deletion; it is removed when the session closes.
    async fn delete(&mut self, message: MessageRef) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

/// Formats a date for an IMAP `SINCE` criterion (`01-Jan-2024`).
pub fn imap_date(date: NaiveDate) -> String {
    date.format("%d-%b-%Y").to_string()
}

/// Builds the search query for an optional lower date bound.
pub fn search_query(since: Option<NaiveDate>) -> String {
    match since {
        Some(date) => format!("SINCE {}", imap_date(date)),
        None => "ALL".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_query() {
        assert_eq!(search_query(None), "ALL");
        assert_eq!(
            search_query(NaiveDate::from_ymd_opt(2024, 1, 1)),
            "SINCE 01-Jan-2024"
        );
        assert_eq!(
            search_query(NaiveDate::from_ymd_opt(2023, 11, 9)),
            "SINCE 09-Nov-2023"
        );
    }
}
