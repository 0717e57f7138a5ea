//! Fingerprint repository: operations on the `fingerprints` and
//! `fingerprint_corrections` tables.

use rusqlite::{params, OptionalExtension};

use super::{Database, DatabaseError};

/// A raw fingerprint row from the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintRow {
    pub fingerprint: String,
    pub origin_mailbox: String,
    pub first_seen_at: String,
    pub result_category: Option<String>,
    pub result_id: String,
}

/// A manual reclassification recorded against a fingerprint.
#[derive(Debug, Clone)]
pub struct CorrectionRow {
    pub fingerprint: String,
    pub previous_category: Option<String>,
    pub corrected_category: String,
    pub reason: String,
    pub corrected_at: String,
}

/// Inserts a fingerprint unless it already exists.
///
/// Returns `true` when this call created the row. The check and the insert
/// are one statement, so two callers racing on the same fingerprint cannot
/// both observe `true`.
pub fn insert_if_absent(
    db: &Database,
    fingerprint: &str,
    origin_mailbox: &str,
    first_seen_at: &str,
) -> Result<bool, DatabaseError> {
    insert_classified_if_absent(db, fingerprint, origin_mailbox, None, first_seen_at)
}

/// Like [`insert_if_absent`], writing the category in the same statement.
/// An existing row keeps its category.
pub fn insert_classified_if_absent(
    db: &Database,
    fingerprint: &str,
    origin_mailbox: &str,
    category: Option<&str>,
    first_seen_at: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO fingerprints
                 (fingerprint, origin_mailbox, first_seen_at, result_category)
             VALUES (?1, ?2, ?3, ?4)",
            params![fingerprint, origin_mailbox, first_seen_at, category],
        )?;
        Ok(inserted == 1)
    })
}

/// Checks whether a fingerprint has been recorded.
pub fn exists(db: &Database, fingerprint: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM fingerprints WHERE fingerprint = ?1",
                params![fingerprint],
                |r| r.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    })
}

/// Loads a single fingerprint row.
pub fn find(db: &Database, fingerprint: &str) -> Result<Option<FingerprintRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT fingerprint, origin_mailbox, first_seen_at, result_category, result_id
                 FROM fingerprints WHERE fingerprint = ?1",
                params![fingerprint],
                |r| {
                    Ok(FingerprintRow {
                        fingerprint: r.get(0)?,
                        origin_mailbox: r.get(1)?,
                        first_seen_at: r.get(2)?,
                        result_category: r.get(3)?,
                        result_id: r.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    })
}

/// Sets the result category if none has been written yet.
/// Returns `true` if the row was updated.
pub fn set_category_if_unset(
    db: &Database,
    fingerprint: &str,
    category: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let updated = conn.execute(
            "UPDATE fingerprints SET result_category = ?2
             WHERE fingerprint = ?1 AND result_category IS NULL",
            params![fingerprint, category],
        )?;
        Ok(updated == 1)
    })
}

/// Sets the downstream record id if it is still empty.
/// Returns `true` if the row was updated.
pub fn set_result_id_if_empty(
    db: &Database,
    fingerprint: &str,
    result_id: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let updated = conn.execute(
            "UPDATE fingerprints SET result_id = ?2
             WHERE fingerprint = ?1 AND result_id = ''",
            params![fingerprint, result_id],
        )?;
        Ok(updated == 1)
    })
}

/// Overwrites the category of an existing fingerprint and records the
/// correction. Returns the previous category, or `None` if the fingerprint
/// does not exist.
pub fn correct_category(
    db: &Database,
    fingerprint: &str,
    category: &str,
    reason: &str,
    corrected_at: &str,
) -> Result<Option<Option<String>>, DatabaseError> {
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;

        let previous: Option<Option<String>> = tx
            .query_row(
                "SELECT result_category FROM fingerprints WHERE fingerprint = ?1",
                params![fingerprint],
                |r| r.get(0),
            )
            .optional()?;

        let Some(previous) = previous else {
            return Ok(None);
        };

        tx.execute(
            "UPDATE fingerprints SET result_category = ?2 WHERE fingerprint = ?1",
            params![fingerprint, category],
        )?;
        tx.execute(
            "INSERT INTO fingerprint_corrections
                (fingerprint, previous_category, corrected_category, reason, corrected_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![fingerprint, previous, category, reason, corrected_at],
        )?;
        tx.commit()?;

        Ok(Some(previous))
    })
}

/// Lists corrections for a fingerprint, oldest first.
pub fn find_corrections(
    db: &Database,
    fingerprint: &str,
) -> Result<Vec<CorrectionRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT fingerprint, previous_category, corrected_category, reason, corrected_at
             FROM fingerprint_corrections WHERE fingerprint = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![fingerprint], |r| {
                Ok(CorrectionRow {
                    fingerprint: r.get(0)?,
                    previous_category: r.get(1)?,
                    corrected_category: r.get(2)?,
                    reason: r.get(3)?,
                    corrected_at: r.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Counts all recorded fingerprints.
pub fn count_all(db: &Database) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row("SELECT COUNT(*) FROM fingerprints", [], |r| r.get(0))?;
        Ok(count)
    })
}

/// Counts fingerprints whose category has not been finalized.
pub fn count_pending(db: &Database) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM fingerprints WHERE result_category IS NULL",
            [],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

/// Counts finalized fingerprints grouped by category, sorted by category name.
pub fn count_by_category(db: &Database) -> Result<Vec<(String, u64)>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT result_category, COUNT(*) FROM fingerprints
             WHERE result_category IS NOT NULL
             GROUP BY result_category ORDER BY result_category",
        )?;
        let rows = stmt
            .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, u64>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    const T0: &str = "2026-02-19T10:00:00Z";

    #[test]
    fn test_insert_if_absent_reports_first_writer() {
        let db = test_db();
        assert!(insert_if_absent(&db, "fp1", "inbox", T0).unwrap());
        assert!(!insert_if_absent(&db, "fp1", "sales", T0).unwrap());

        let row = find(&db, "fp1").unwrap().unwrap();
        assert_eq!(row.origin_mailbox, "inbox");
        assert_eq!(row.result_category, None);
        assert_eq!(row.result_id, "");
    }

    #[test]
    fn test_category_is_write_once() {
        let db = test_db();
        insert_if_absent(&db, "fp1", "inbox", T0).unwrap();

        assert!(set_category_if_unset(&db, "fp1", "formal_rfq").unwrap());
        assert!(!set_category_if_unset(&db, "fp1", "unknown").unwrap());

        let row = find(&db, "fp1").unwrap().unwrap();
        assert_eq!(row.result_category.as_deref(), Some("formal_rfq"));
    }

    #[test]
    fn test_result_id_set_once() {
        let db = test_db();
        insert_if_absent(&db, "fp1", "inbox", T0).unwrap();

        assert!(set_result_id_if_empty(&db, "fp1", "rfq-1").unwrap());
        assert!(!set_result_id_if_empty(&db, "fp1", "rfq-2").unwrap());
        assert_eq!(find(&db, "fp1").unwrap().unwrap().result_id, "rfq-1");
    }

    #[test]
    fn test_correct_category_writes_audit_row() {
        let db = test_db();
        insert_if_absent(&db, "fp1", "inbox", T0).unwrap();
        set_category_if_unset(&db, "fp1", "unknown").unwrap();

        let previous = correct_category(&db, "fp1", "price_check", "operator review", T0)
            .unwrap()
            .unwrap();
        assert_eq!(previous.as_deref(), Some("unknown"));

        let row = find(&db, "fp1").unwrap().unwrap();
        assert_eq!(row.result_category.as_deref(), Some("price_check"));

        let corrections = find_corrections(&db, "fp1").unwrap();
        assert_eq!(corrections.len(), 1);
        assert_eq!(corrections[0].corrected_category, "price_check");
        assert_eq!(corrections[0].reason, "operator review");
    }

    #[test]
    fn test_correct_missing_fingerprint() {
        let db = test_db();
        let result = correct_category(&db, "nope", "unknown", "n/a", T0).unwrap();
        assert!(result.is_none());
        assert!(find_corrections(&db, "nope").unwrap().is_empty());
    }

    #[test]
    fn test_counts() {
        let db = test_db();
        insert_if_absent(&db, "a", "inbox", T0).unwrap();
        insert_if_absent(&db, "b", "inbox", T0).unwrap();
        insert_if_absent(&db, "c", "inbox", T0).unwrap();
        set_category_if_unset(&db, "a", "formal_rfq").unwrap();
        set_category_if_unset(&db, "b", "formal_rfq").unwrap();

        assert_eq!(count_all(&db).unwrap(), 3);
        assert_eq!(count_pending(&db).unwrap(), 1);
        assert_eq!(
            count_by_category(&db).unwrap(),
            vec![("formal_rfq".to_string(), 2)]
        );
    }
}
