//! Schema versions for the pipeline database.
//!
//! The SQL lives in `sql/NNN_*.sql`; `_migrations` records what is applied.

use rusqlite::Connection;

use super::error::DatabaseError;

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

/// Append only. Never edit a released entry.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_fingerprints_table",
        sql: include_str!("sql/001_create_fingerprints.sql"),
    },
    Migration {
        version: 2,
        description: "create_fingerprint_corrections_table",
        sql: include_str!("sql/002_create_fingerprint_corrections.sql"),
    },
    Migration {
        version: 3,
        description: "create_mailbox_cursor_table",
        sql: include_str!("sql/003_create_mailbox_cursor.sql"),
    },
    Migration {
        version: 4,
        description: "create_qa_runs_table",
        sql: include_str!("sql/004_create_qa_runs.sql"),
    },
    Migration {
        version: 5,
        description: "create_learned_patterns_table",
        sql: include_str!("sql/005_create_learned_patterns.sql"),
    },
];

/// Applies every migration newer than the recorded version. Each one runs
/// in its own transaction together with its `_migrations` row.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let applied = current_version(conn)?;
    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > applied).collect();
    if pending.is_empty() {
        log::debug!("Schema up to date at v{}", applied);
        return Ok(());
    }

    for migration in pending {
        log::info!("Applying schema v{}: {}", migration.version, migration.description);
        let failed = |e: rusqlite::Error| DatabaseError::Migration {
            version: migration.version,
            reason: e.to_string(),
        };

        let tx = conn.unchecked_transaction().map_err(failed)?;
        tx.execute_batch(migration.sql).map_err(failed)?;
        tx.execute(
            "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
            rusqlite::params![migration.version, migration.description],
        )
        .map_err(failed)?;
        tx.commit().map_err(failed)?;
    }

    Ok(())
}

/// Highest applied schema version, 0 for a fresh file.
pub fn current_version(conn: &Connection) -> Result<u32, DatabaseError> {
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?)
}
