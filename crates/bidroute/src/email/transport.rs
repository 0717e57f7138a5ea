//! The mailbox protocol seam.
//!
//! The watcher only needs five operations. `ImapClient` implements them over
//! IMAP; tests script them.

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::config::MailboxConfig;

use super::error::Result;

#[async_trait]
pub trait MailTransport: Send {
    async fn connect(&mut self) -> Result<()>;

    /// Opens `folder` read-only and returns its UIDVALIDITY.
    async fn examine(&mut self, folder: &str) -> Result<u32>;

    /// UIDs of messages received on or after `since`, read or unread,
    /// in ascending order.
    async fn search_since(&mut self, since: NaiveDate) -> Result<Vec<u32>>;

    /// Raw RFC 822 bytes of one message, without setting `\Seen`.
    async fn fetch_peek(&mut self, uid: u32) -> Result<Vec<u8>>;

    async fn disconnect(&mut self) -> Result<()>;
}

/// Creates a fresh transport for each poll cycle.
pub trait TransportFactory: Send + Sync {
    fn create(&self, config: &MailboxConfig) -> Box<dyn MailTransport>;
}

/// IMAP date format used by `SEARCH SINCE` (e.g. `01-Jan-2024`).
pub fn imap_date(date: NaiveDate) -> String {
    date.format("%d-%b-%Y").to_string()
}
