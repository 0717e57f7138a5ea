//! Mailbox access: IMAP transport, message parsing, the processed-UID
//! cursor and the per-mailbox watcher.

pub mod client;
pub mod cursor;
pub mod error;
pub mod parser;
pub mod transport;
pub mod watcher;

pub use client::{ImapClient, ImapTransportFactory};
pub use cursor::{prune_cursor, CursorOutcome, CursorStats, MailboxCursor};
pub use error::EmailError;
pub use parser::parse_message;
pub use transport::{imap_date, MailTransport, TransportFactory};
pub use watcher::{backoff_delay, MailboxWatcher, PollReport, WatcherState};
