//! SQLite storage for fingerprints, mailbox cursors and the QA ledger.
//!
//! Repositories are free functions over a `Database`. One connection
//! behind a mutex serializes every call, so a fingerprint check-and-record
//! is atomic across watcher threads.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;

pub mod cursor_repo;
pub mod error;
pub mod fingerprint_repo;
pub mod migrations;
pub mod qa_repo;

pub use error::DatabaseError;

/// Shared handle to the pipeline database. Clones share one connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens the file at `path`, creating it and its directory if needed,
    /// and brings the schema up to date.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| DatabaseError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let conn = Connection::open(path)?;
        // Watchers on other threads wait on each other's writes instead of
        // failing with SQLITE_BUSY.
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
        let db = Self::init(conn)?;
        log::info!("Pipeline database ready at {}", path.display());
        Ok(db)
    }

    /// A private in-memory database, used by tests and the fixture harness.
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, DatabaseError> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        migrations::run_all(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` while holding the connection. Calls from different threads
    /// are serialized, which is what makes check-then-insert sequences in
    /// the repositories atomic.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        f(&conn)
    }
}

/// Formats a timestamp the way every table stores it (RFC 3339, UTC, `Z`
/// suffix, second precision) so that text comparison orders correctly.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Returns the canonical database path: `~/.bidroute/data/bidroute.db`.
pub fn default_database_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".bidroute").join("data").join("bidroute.db"))
}
