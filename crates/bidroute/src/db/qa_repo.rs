//! QA ledger repository: the `qa_runs` history and `learned_patterns`
//! gap log. Both tables are append-only and capped: once a cap is exceeded
//! the oldest rows are dropped.

use rusqlite::params;

use super::{Database, DatabaseError};

/// A persisted QA run.
#[derive(Debug, Clone)]
pub struct QaRunRow {
    pub id: i64,
    pub run_at: String,
    pub kind: String,
    pub score: u32,
    pub grade: String,
    pub total: u32,
    pub matched: u32,
    pub gap_count: u32,
    /// JSON document with the per-run breakdown.
    pub details: String,
}

/// A persisted gap, kept as raw material for pattern-table improvements.
#[derive(Debug, Clone)]
pub struct LearnedPatternRow {
    pub id: i64,
    pub recorded_at: String,
    pub gap_kind: String,
    pub expected_category: String,
    pub subject: String,
    pub sender: String,
    pub expected_id: Option<String>,
    pub detail: String,
}

/// Appends a run and trims the history to `cap` rows. Returns the new row id.
pub fn insert_run(db: &Database, row: &QaRunRow, cap: usize) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO qa_runs (run_at, kind, score, grade, total, matched, gap_count, details)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                row.run_at,
                row.kind,
                row.score,
                row.grade,
                row.total,
                row.matched,
                row.gap_count,
                row.details,
            ],
        )?;
        let id = conn.last_insert_rowid();

        let trimmed = conn.execute(
            "DELETE FROM qa_runs WHERE id NOT IN
                (SELECT id FROM qa_runs ORDER BY id DESC LIMIT ?1)",
            params![cap as i64],
        )?;
        if trimmed > 0 {
            log::debug!("Trimmed {} old QA runs", trimmed);
        }

        Ok(id)
    })
}

/// Returns up to `limit` runs, newest first.
pub fn recent_runs(db: &Database, limit: usize) -> Result<Vec<QaRunRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id, run_at, kind, score, grade, total, matched, gap_count, details
             FROM qa_runs ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |r| {
                Ok(QaRunRow {
                    id: r.get(0)?,
                    run_at: r.get(1)?,
                    kind: r.get(2)?,
                    score: r.get(3)?,
                    grade: r.get(4)?,
                    total: r.get(5)?,
                    matched: r.get(6)?,
                    gap_count: r.get(7)?,
                    details: r.get(8)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Counts stored runs.
pub fn count_runs(db: &Database) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row("SELECT COUNT(*) FROM qa_runs", [], |r| r.get(0))?;
        Ok(count)
    })
}

/// Appends learned patterns and trims the log to `cap` rows.
pub fn insert_learned(
    db: &Database,
    rows: &[LearnedPatternRow],
    cap: usize,
) -> Result<(), DatabaseError> {
    if rows.is_empty() {
        return Ok(());
    }

    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO learned_patterns
                    (recorded_at, gap_kind, expected_category, subject, sender, expected_id, detail)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for row in rows {
                stmt.execute(params![
                    row.recorded_at,
                    row.gap_kind,
                    row.expected_category,
                    row.subject,
                    row.sender,
                    row.expected_id,
                    row.detail,
                ])?;
            }
        }
        tx.execute(
            "DELETE FROM learned_patterns WHERE id NOT IN
                (SELECT id FROM learned_patterns ORDER BY id DESC LIMIT ?1)",
            params![cap as i64],
        )?;
        tx.commit()?;
        Ok(())
    })
}

/// Returns up to `limit` learned patterns, newest first.
pub fn recent_learned(db: &Database, limit: usize) -> Result<Vec<LearnedPatternRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id, recorded_at, gap_kind, expected_category, subject, sender, expected_id, detail
             FROM learned_patterns ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |r| {
                Ok(LearnedPatternRow {
                    id: r.get(0)?,
                    recorded_at: r.get(1)?,
                    gap_kind: r.get(2)?,
                    expected_category: r.get(3)?,
                    subject: r.get(4)?,
                    sender: r.get(5)?,
                    expected_id: r.get(6)?,
                    detail: r.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Counts stored learned patterns.
pub fn count_learned(db: &Database) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 =
            conn.query_row("SELECT COUNT(*) FROM learned_patterns", [], |r| r.get(0))?;
        Ok(count)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    fn run(score: u32) -> QaRunRow {
        QaRunRow {
            id: 0,
            run_at: "2026-02-19T10:00:00Z".to_string(),
            kind: "audit".to_string(),
            score,
            grade: "A".to_string(),
            total: 10,
            matched: 10,
            gap_count: 0,
            details: "{}".to_string(),
        }
    }

    fn learned(subject: &str) -> LearnedPatternRow {
        LearnedPatternRow {
            id: 0,
            recorded_at: "2026-02-19T10:00:00Z".to_string(),
            gap_kind: "missing".to_string(),
            expected_category: "price_check".to_string(),
            subject: subject.to_string(),
            sender: "buyer@cdcr.ca.gov".to_string(),
            expected_id: None,
            detail: String::new(),
        }
    }

    #[test]
    fn test_runs_are_capped_oldest_first() {
        let db = test_db();
        for score in 0..7 {
            insert_run(&db, &run(score), 5).unwrap();
        }

        assert_eq!(count_runs(&db).unwrap(), 5);
        let scores: Vec<u32> = recent_runs(&db, 10).unwrap().iter().map(|r| r.score).collect();
        assert_eq!(scores, vec![6, 5, 4, 3, 2]);
    }

    #[test]
    fn test_recent_runs_limit() {
        let db = test_db();
        for score in 0..4 {
            insert_run(&db, &run(score), 100).unwrap();
        }
        assert_eq!(recent_runs(&db, 2).unwrap().len(), 2);
    }

    #[test]
    fn test_learned_patterns_are_capped() {
        let db = test_db();
        let batch: Vec<_> = (0..4).map(|i| learned(&format!("s{}", i))).collect();
        insert_learned(&db, &batch, 3).unwrap();
        insert_learned(&db, &[learned("s4")], 3).unwrap();

        assert_eq!(count_learned(&db).unwrap(), 3);
        let subjects: Vec<String> = recent_learned(&db, 10)
            .unwrap()
            .into_iter()
            .map(|r| r.subject)
            .collect();
        assert_eq!(subjects, vec!["s4", "s3", "s2"]);
    }

    #[test]
    fn test_insert_learned_empty_is_noop() {
        let db = test_db();
        insert_learned(&db, &[], 3).unwrap();
        assert_eq!(count_learned(&db).unwrap(), 0);
    }
}
