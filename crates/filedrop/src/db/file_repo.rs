//! File record repository — CRUD and transition operations for the `files` table.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// A raw file record row from the database.
#[derive(Debug, Clone)]
pub struct FileRow {
    pub id: String,
    pub path: String,
    pub filename: String,
    pub status: String,
    pub note: String,
    pub attempts: u32,
    pub created_at: String,
    pub updated_at: String,
    pub processed_at: Option<String>,
}

impl FileRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            path: row.get("path")?,
            filename: row.get("filename")?,
            status: row.get("status")?,
            note: row.get("note")?,
            attempts: row.get("attempts")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            processed_at: row.get("processed_at")?,
        })
    }
}

/// Inserts a new file record.
pub fn insert(db: &Database, row: &FileRow) -> Result<(), DatabaseError> {
    db.run(|conn| {
        conn.execute(
            "INSERT INTO files (id, path, filename, status, note, attempts,
             created_at, updated_at, processed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                row.id,
                row.path,
                row.filename,
                row.status,
                row.note,
                row.attempts,
                row.created_at,
                row.updated_at,
                row.processed_at,
            ],
        )?;
        Ok(())
    })
}

/// Finds a file record by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<FileRow>, DatabaseError> {
    db.run(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM files WHERE id = ?1",
                params![id],
                FileRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Finds the most recent non-terminal record for a path, if any.
pub fn find_live_by_path(db: &Database, path: &str) -> Result<Option<FileRow>, DatabaseError> {
    db.run(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM files
                 WHERE path = ?1 AND status IN ('pending', 'processing')
                 ORDER BY created_at DESC, id DESC LIMIT 1",
                params![path],
                FileRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Conditionally transitions a record from one status to another.
///
/// The `from` status is part of the WHERE clause, so a concurrent writer
/// that got there first makes this a no-op. Returns whether the row was
/// actually updated.
pub fn transition(
    db: &Database,
    id: &str,
    from: &str,
    to: &str,
    note: Option<&str>,
    processed_at: Option<&str>,
    updated_at: &str,
) -> Result<bool, DatabaseError> {
    db.run(|conn| {
        let changed = conn.execute(
            "UPDATE files SET status = ?3, note = COALESCE(?4, note),
             processed_at = COALESCE(?5, processed_at), updated_at = ?6
             WHERE id = ?1 AND status = ?2",
            params![id, from, to, note, processed_at, updated_at],
        )?;
        Ok(changed == 1)
    })
}

/// Increments the attempt counter for a record.
pub fn record_attempt(db: &Database, id: &str, updated_at: &str) -> Result<(), DatabaseError> {
    db.run(|conn| {
        conn.execute(
            "UPDATE files SET attempts = attempts + 1, updated_at = ?2 WHERE id = ?1",
            params![id, updated_at],
        )?;
        Ok(())
    })
}

/// Returns a page of records ordered by creation time, plus the total count.
///
/// `page` is 1-based; out-of-range pages clamp to the last valid page.
/// `page_size` is clamped to at least 1.
pub fn list_page(
    db: &Database,
    page: u64,
    page_size: u64,
) -> Result<(Vec<FileRow>, u64), DatabaseError> {
    db.run(|conn| {
        let total: u64 = conn.query_row("SELECT COUNT(*) FROM files", [], |r| r.get(0))?;

        let page_size = page_size.max(1);
        let last_page = (total.max(1) + page_size - 1) / page_size;
        let page = page.clamp(1, last_page);
        let offset = (page - 1) * page_size;

        let mut stmt = conn.prepare(
            "SELECT * FROM files ORDER BY created_at, id LIMIT ?1 OFFSET ?2",
        )?;
        let rows: Vec<FileRow> = stmt
            .query_map(params![page_size as i64, offset as i64], FileRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((rows, total))
    })
}

/// Counts records with the given status.
pub fn count_by_status(db: &Database, status: &str) -> Result<u64, DatabaseError> {
    db.run(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM files WHERE status = ?1",
            params![status],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

/// Flips `processing` records last touched before `cutoff` back to `pending`,
/// returning their ids. Select and update run under the same connection lock.
pub fn requeue_stale(
    db: &Database,
    cutoff: &str,
    updated_at: &str,
) -> Result<Vec<String>, DatabaseError> {
    db.run(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id FROM files WHERE status = 'processing' AND updated_at < ?1",
        )?;
        let ids: Vec<String> = stmt
            .query_map(params![cutoff], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;

        for id in &ids {
            conn.execute(
                "UPDATE files SET status = 'pending', updated_at = ?2
                 WHERE id = ?1 AND status = 'processing'",
                params![id, updated_at],
            )?;
        }

        Ok(ids)
    })
}
