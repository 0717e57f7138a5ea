//! Per-mailbox record of processed UIDs.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use log::{debug, info};

use crate::db::{cursor_repo, format_timestamp, Database};
use crate::router::Disposition;

use super::error::{EmailError, Result};

/// Why a UID was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorOutcome {
    Routed(Disposition),
    /// Sent by one of our own addresses; never triaged.
    SelfSent,
    /// Could not be parsed; recorded so it is not fetched forever.
    ParseError,
}

impl CursorOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CursorOutcome::Routed(d) => d.as_str(),
            CursorOutcome::SelfSent => "self_sent",
            CursorOutcome::ParseError => "parse_error",
        }
    }
}

/// Tracks which UIDs of one mailbox have been handled.
///
/// Rows are scoped by UIDVALIDITY. A changed UIDVALIDITY starts a fresh
/// scope; the old rows are left for retention to prune.
pub struct MailboxCursor {
    db: Database,
    mailbox: String,
    current_uidvalidity: Option<u32>,
}

impl MailboxCursor {
    pub fn new(db: Database, mailbox: impl Into<String>) -> Self {
        Self {
            db,
            mailbox: mailbox.into(),
            current_uidvalidity: None,
        }
    }

    pub fn mailbox(&self) -> &str {
        &self.mailbox
    }

    /// Sets the UIDVALIDITY reported by the server for this cycle.
    pub fn set_uidvalidity(&mut self, uidvalidity: u32) -> Result<()> {
        if let Some(last) = cursor_repo::find_last_uidvalidity(&self.db, &self.mailbox)? {
            if last != uidvalidity {
                info!(
                    "UIDVALIDITY changed for mailbox '{}': {} -> {}, rescanning the lookback window",
                    self.mailbox, last, uidvalidity
                );
            }
        }
        self.current_uidvalidity = Some(uidvalidity);
        Ok(())
    }

    pub fn uidvalidity(&self) -> Option<u32> {
        self.current_uidvalidity
    }

    pub fn is_processed(&self, uid: u32) -> Result<bool> {
        let uidvalidity = self.require_uidvalidity()?;
        let processed = cursor_repo::find_processed_uids(&self.db, &self.mailbox, uidvalidity, &[uid])?;
        Ok(!processed.is_empty())
    }

    /// Records a handled UID. Recording the same UID twice is a no-op.
    pub fn mark(
        &self,
        uid: u32,
        message_id: Option<String>,
        fingerprint: Option<String>,
        outcome: CursorOutcome,
    ) -> Result<()> {
        let uidvalidity = self.require_uidvalidity()?;
        let row = cursor_repo::CursorRow {
            mailbox: self.mailbox.clone(),
            uidvalidity,
            uid,
            message_id,
            fingerprint,
            outcome: outcome.as_str().to_string(),
            processed_at: format_timestamp(Utc::now()),
        };
        cursor_repo::insert(&self.db, &row)?;
        debug!(
            "Recorded UID {} in '{}' as {} (UIDVALIDITY={})",
            uid,
            self.mailbox,
            outcome.as_str(),
            uidvalidity
        );
        Ok(())
    }

    /// Keeps only UIDs not yet recorded, preserving order.
    pub fn filter_unprocessed(&self, uids: Vec<u32>) -> Result<Vec<u32>> {
        let uidvalidity = self.require_uidvalidity()?;
        if uids.is_empty() {
            return Ok(Vec::new());
        }

        let processed: HashSet<u32> =
            cursor_repo::find_processed_uids(&self.db, &self.mailbox, uidvalidity, &uids)?
                .into_iter()
                .collect();
        let total = uids.len();
        let unprocessed: Vec<u32> = uids.into_iter().filter(|uid| !processed.contains(uid)).collect();

        debug!("Filtered {} UIDs, {} unprocessed", total, unprocessed.len());
        Ok(unprocessed)
    }

    pub fn stats(&self) -> Result<CursorStats> {
        Ok(CursorStats {
            mailbox: self.mailbox.clone(),
            total_processed: cursor_repo::count_by_mailbox(&self.db, &self.mailbox)?,
            self_sent: cursor_repo::count_by_outcome(&self.db, &self.mailbox, "self_sent")?,
            parse_errors: cursor_repo::count_by_outcome(&self.db, &self.mailbox, "parse_error")?,
            last_processed_at: cursor_repo::find_last_processed_at(&self.db, &self.mailbox)?,
            current_uidvalidity: self.current_uidvalidity,
        })
    }

    fn require_uidvalidity(&self) -> Result<u32> {
        self.current_uidvalidity.ok_or_else(|| {
            EmailError::ConfigError("UIDVALIDITY not set, examine the folder first".to_string())
        })
    }
}

/// Deletes cursor rows older than `retention_days` whose fingerprint is
/// already stored. Applies to all mailboxes.
pub fn prune_cursor(db: &Database, retention_days: u32, now: DateTime<Utc>) -> Result<u64> {
    let cutoff = now - Duration::days(i64::from(retention_days));
    let deleted = cursor_repo::prune_older_than(db, &format_timestamp(cutoff))?;
    if deleted > 0 {
        info!("Pruned {} cursor rows older than {} days", deleted, retention_days);
    }
    Ok(deleted)
}

/// Cursor statistics for one mailbox.
#[derive(Debug)]
pub struct CursorStats {
    pub mailbox: String,
    pub total_processed: u64,
    pub self_sent: u64,
    pub parse_errors: u64,
    /// RFC 3339.
    pub last_processed_at: Option<String>,
    pub current_uidvalidity: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    #[test]
    fn test_requires_uidvalidity() {
        let cursor = MailboxCursor::new(test_db(), "sales");
        assert!(matches!(cursor.filter_unprocessed(vec![1]), Err(EmailError::ConfigError(_))));
        assert!(cursor
            .mark(1, None, None, CursorOutcome::SelfSent)
            .is_err());
    }

    #[test]
    fn test_mark_and_filter_preserves_order() {
        let mut cursor = MailboxCursor::new(test_db(), "sales");
        cursor.set_uidvalidity(7).unwrap();

        cursor
            .mark(2, None, None, CursorOutcome::Routed(Disposition::Dispatched))
            .unwrap();
        cursor.mark(4, None, None, CursorOutcome::ParseError).unwrap();

        assert_eq!(cursor.filter_unprocessed(vec![1, 2, 3, 4, 5]).unwrap(), vec![1, 3, 5]);
        assert!(cursor.is_processed(2).unwrap());
        assert!(!cursor.is_processed(3).unwrap());
    }

    #[test]
    fn test_uidvalidity_change_rescans() {
        let db = test_db();
        let mut cursor = MailboxCursor::new(db.clone(), "sales");
        cursor.set_uidvalidity(7).unwrap();
        cursor.mark(1, None, None, CursorOutcome::SelfSent).unwrap();

        let mut recreated = MailboxCursor::new(db, "sales");
        recreated.set_uidvalidity(8).unwrap();
        assert_eq!(recreated.filter_unprocessed(vec![1]).unwrap(), vec![1]);
        // Old rows are kept until retention removes them.
        assert_eq!(recreated.stats().unwrap().total_processed, 1);
    }

    #[test]
    fn test_stats() {
        let mut cursor = MailboxCursor::new(test_db(), "sales");
        cursor.set_uidvalidity(1).unwrap();
        cursor.mark(1, None, None, CursorOutcome::SelfSent).unwrap();
        cursor.mark(2, None, None, CursorOutcome::ParseError).unwrap();
        cursor
            .mark(3, Some("<m3>".into()), Some("ab".into()), CursorOutcome::Routed(Disposition::Logged))
            .unwrap();

        let stats = cursor.stats().unwrap();
        assert_eq!(stats.mailbox, "sales");
        assert_eq!(stats.total_processed, 3);
        assert_eq!(stats.self_sent, 1);
        assert_eq!(stats.parse_errors, 1);
        assert!(stats.last_processed_at.is_some());
        assert_eq!(stats.current_uidvalidity, Some(1));
    }

    #[test]
    fn test_prune_respects_retention() {
        let db = test_db();
        let mut cursor = MailboxCursor::new(db.clone(), "sales");
        cursor.set_uidvalidity(1).unwrap();
        cursor.mark(1, None, None, CursorOutcome::SelfSent).unwrap();

        assert_eq!(prune_cursor(&db, 30, Utc::now()).unwrap(), 0);
        assert_eq!(prune_cursor(&db, 30, Utc::now() + Duration::days(31)).unwrap(), 1);
        assert_eq!(cursor.stats().unwrap().total_processed, 0);
    }
}
