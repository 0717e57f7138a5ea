//! Mailbox cursor repository: operations on the `mailbox_cursor` table.

use rusqlite::params;

use super::{Database, DatabaseError};

/// A raw cursor row from the database.
#[derive(Debug, Clone)]
pub struct CursorRow {
    pub mailbox: String,
    pub uidvalidity: u32,
    pub uid: u32,
    pub message_id: Option<String>,
    pub fingerprint: Option<String>,
    pub outcome: String,
    pub processed_at: String,
}

/// Inserts a cursor record. Re-recording the same UID is ignored.
pub fn insert(db: &Database, row: &CursorRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT OR IGNORE INTO mailbox_cursor
                (mailbox, uidvalidity, uid, message_id, fingerprint, outcome, processed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                row.mailbox,
                row.uidvalidity,
                row.uid,
                row.message_id,
                row.fingerprint,
                row.outcome,
                row.processed_at,
            ],
        )?;
        Ok(())
    })
}

/// Returns all UIDs from `uids` that are already in the cursor.
pub fn find_processed_uids(
    db: &Database,
    mailbox: &str,
    uidvalidity: u32,
    uids: &[u32],
) -> Result<Vec<u32>, DatabaseError> {
    if uids.is_empty() {
        return Ok(Vec::new());
    }

    db.with_conn(|conn| {
        // Build IN clause with positional params.
        let placeholders: Vec<String> = (0..uids.len()).map(|i| format!("?{}", i + 3)).collect();
        let sql = format!(
            "SELECT uid FROM mailbox_cursor
             WHERE mailbox = ?1 AND uidvalidity = ?2 AND uid IN ({})",
            placeholders.join(", ")
        );

        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        param_values.push(Box::new(mailbox.to_string()));
        param_values.push(Box::new(uidvalidity));
        for &uid in uids {
            param_values.push(Box::new(uid));
        }

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let result: Vec<u32> = stmt
            .query_map(params_ref.as_slice(), |row| row.get::<_, u32>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(result)
    })
}

/// Finds the UIDVALIDITY of the most recently recorded row for a mailbox.
pub fn find_last_uidvalidity(db: &Database, mailbox: &str) -> Result<Option<u32>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT uidvalidity FROM mailbox_cursor WHERE mailbox = ?1
             ORDER BY processed_at DESC, uid DESC LIMIT 1",
        )?;
        let mut rows = stmt.query_map(params![mailbox], |row| row.get::<_, u32>(0))?;
        match rows.next() {
            Some(Ok(val)) => Ok(Some(val)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Counts cursor rows for a mailbox across all UIDVALIDITY epochs.
pub fn count_by_mailbox(db: &Database, mailbox: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM mailbox_cursor WHERE mailbox = ?1",
            params![mailbox],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

/// Counts cursor rows for a mailbox with the given outcome.
pub fn count_by_outcome(db: &Database, mailbox: &str, outcome: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM mailbox_cursor WHERE mailbox = ?1 AND outcome = ?2",
            params![mailbox, outcome],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

/// Finds the timestamp of the last processed message for a mailbox.
pub fn find_last_processed_at(
    db: &Database,
    mailbox: &str,
) -> Result<Option<String>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT processed_at FROM mailbox_cursor WHERE mailbox = ?1
             ORDER BY processed_at DESC LIMIT 1",
        )?;
        let mut rows = stmt.query_map(params![mailbox], |row| row.get::<_, String>(0))?;
        match rows.next() {
            Some(Ok(val)) => Ok(Some(val)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Deletes cursor rows processed before `cutoff` whose message is already
/// covered by the fingerprint store. Rows without a fingerprint (follow-ups,
/// self-sent, parse errors) carry nothing to re-dispatch and are pruned on
/// age alone. Returns the number of rows deleted.
pub fn prune_older_than(db: &Database, cutoff: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count = conn.execute(
            "DELETE FROM mailbox_cursor
             WHERE processed_at < ?1
               AND (fingerprint IS NULL
                    OR EXISTS (SELECT 1 FROM fingerprints f
                               WHERE f.fingerprint = mailbox_cursor.fingerprint))",
            params![cutoff],
        )?;
        Ok(count as u64)
    })
}
