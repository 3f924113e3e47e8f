//! SQLite persistence for file records.
//!
//! One connection serves the whole process: the repos in [`file_repo`] and
//! [`stats_repo`] funnel every statement through [`Database::run`], which
//! serializes access behind a mutex. WAL mode keeps the read side (summary,
//! trend, listing) from blocking on worker transitions.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use thiserror::Error;

pub mod file_repo;
pub mod migrations;
pub mod stats_repo;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQL error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("Cannot create database directory '{path}': {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Migration v{version} ({description}) failed: {reason}")]
    Migration {
        version: u32,
        description: &'static str,
        reason: String,
    },

    #[error("No database path configured and no home directory to derive one from")]
    NoDatabasePath,

    #[error("Database lock poisoned")]
    LockPoisoned,
}

/// Handle to the record database. Clones share one connection, so the
/// store, the workers and the read-side queries all see the same state.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens the database the daemon should use: `database_path` from the
    /// config when set, `~/.filedrop/data/filedrop.db` otherwise.
    pub fn open_default(database_path: Option<&str>) -> Result<Self, DatabaseError> {
        let path = match database_path {
            Some(p) => PathBuf::from(p),
            None => dirs::home_dir()
                .map(|h| h.join(".filedrop").join("data").join("filedrop.db"))
                .ok_or(DatabaseError::NoDatabasePath)?,
        };
        Self::open(&path)
    }

    /// Opens (or creates) the record database at `path` and brings the
    /// schema up to date.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DatabaseError::CreateDir {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        migrations::run_all(&conn)?;

        log::info!("Record database ready at {}", path.display());
        Ok(Self::wrap(conn))
    }

    /// In-memory database with the full schema, for tests.
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        migrations::run_all(&conn)?;
        Ok(Self::wrap(conn))
    }

    fn wrap(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Runs `f` with exclusive access to the connection.
    pub fn run<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        f(&conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_default_honors_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.db");

        let db = Database::open_default(Some(path.to_str().unwrap())).unwrap();
        db.run(|conn| {
            conn.execute(
                "INSERT INTO files (id, path, filename, created_at, updated_at)
                 VALUES ('f1', '/drop/a.txt', 'a.txt', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
                [],
            )?;
            Ok(())
        })
        .unwrap();

        assert!(path.exists());
    }

    #[test]
    fn test_open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deep").join("records.db");

        Database::open(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_fresh_schema_defaults_new_rows_to_pending() {
        let db = Database::open_in_memory().unwrap();
        db.run(|conn| {
            conn.execute(
                "INSERT INTO files (id, path, filename, created_at, updated_at)
                 VALUES ('f1', '/drop/a.txt', 'a.txt', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
                [],
            )?;
            let status: String =
                conn.query_row("SELECT status FROM files WHERE id = 'f1'", [], |r| r.get(0))?;
            assert_eq!(status, "pending");
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_clones_see_the_same_records() {
        let db = Database::open_in_memory().unwrap();
        let reader = db.clone();

        db.run(|conn| {
            conn.execute(
                "INSERT INTO files (id, path, filename, created_at, updated_at)
                 VALUES ('f1', '/drop/a.txt', 'a.txt', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
                [],
            )?;
            Ok(())
        })
        .unwrap();

        reader
            .run(|conn| {
                let count: u32 =
                    conn.query_row("SELECT COUNT(*) FROM files", [], |r| r.get(0))?;
                assert_eq!(count, 1);
                Ok(())
            })
            .unwrap();
    }
}
