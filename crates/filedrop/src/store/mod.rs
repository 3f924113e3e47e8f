//! Typed status store over the database layer.
//!
//! Every lifecycle transition goes through here. Transitions are
//! forward-only (`Pending → Processing → {Success, Failed}`) and applied
//! with a conditional update, so a lost race surfaces as
//! `StoreError::InvalidTransition` instead of clobbering state.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::config::TrendBucket;
use crate::db::file_repo::{self, FileRow};
use crate::db::stats_repo::{self, StatusSummary, TrendPoint};
use crate::db::{Database, DatabaseError};

/// Lifecycle state of a tracked file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Pending,
    Processing,
    Success,
    Failed,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Pending => "pending",
            FileStatus::Processing => "processing",
            FileStatus::Success => "success",
            FileStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(FileStatus::Pending),
            "processing" => Some(FileStatus::Processing),
            "success" => Some(FileStatus::Success),
            "failed" => Some(FileStatus::Failed),
            _ => None,
        }
    }

    /// True for states with no outgoing transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, FileStatus::Success | FileStatus::Failed)
    }
}

/// Errors from store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("No record with id {id}")]
    NotFound { id: String },

    #[error("Record {id} is {actual:?}, expected {expected:?}")]
    InvalidTransition {
        id: String,
        expected: FileStatus,
        actual: FileStatus,
    },
}

/// A tracked file record.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: String,
    pub path: String,
    pub filename: String,
    pub status: FileStatus,
    /// Failure detail, or a note supplied by the unit of work. Empty on
    /// the success path otherwise.
    pub note: String,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set exactly once, when the record reaches a terminal state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
}

impl FileRecord {
    fn from_row(row: &FileRow) -> Self {
        let status = FileStatus::parse(&row.status).unwrap_or_else(|| {
            log::warn!(
                "Unknown status '{}' for record {}, defaulting to pending",
                row.status,
                row.id
            );
            FileStatus::Pending
        });

        Self {
            id: row.id.clone(),
            path: row.path.clone(),
            filename: row.filename.clone(),
            status,
            note: row.note.clone(),
            attempts: row.attempts,
            created_at: parse_timestamp(&row.created_at),
            updated_at: parse_timestamp(&row.updated_at),
            processed_at: row.processed_at.as_deref().map(parse_timestamp),
        }
    }
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            log::warn!("parse_timestamp: failed to parse '{}': {}", s, e);
            Utc::now()
        })
}

/// Uniform millisecond-precision RFC 3339 with a `Z` suffix, so stored
/// timestamps compare lexicographically and SQLite's strftime accepts them.
fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Durable store of file records and their lifecycle state.
#[derive(Clone)]
pub struct StatusStore {
    db: Database,
}

impl StatusStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Creates a fresh pending record for a file appearance.
    pub fn create(&self, path: &Path) -> Result<FileRecord, StoreError> {
        let now = format_timestamp(Utc::now());
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string());

        let row = FileRow {
            id: uuid::Uuid::new_v4().to_string(),
            path: path.to_string_lossy().to_string(),
            filename,
            status: FileStatus::Pending.as_str().to_string(),
            note: String::new(),
            attempts: 0,
            created_at: now.clone(),
            updated_at: now,
            processed_at: None,
        };
        file_repo::insert(&self.db, &row)?;

        log::debug!("Created record {} for {}", row.id, row.path);
        Ok(FileRecord::from_row(&row))
    }

    pub fn get(&self, id: &str) -> Result<Option<FileRecord>, StoreError> {
        Ok(file_repo::find_by_id(&self.db, id)?
            .as_ref()
            .map(FileRecord::from_row))
    }

    /// Returns the newest non-terminal record for a path, if any.
    pub fn find_live_by_path(&self, path: &Path) -> Result<Option<FileRecord>, StoreError> {
        Ok(
            file_repo::find_live_by_path(&self.db, &path.to_string_lossy())?
                .as_ref()
                .map(FileRecord::from_row),
        )
    }

    /// Transitions `Pending → Processing`.
    pub fn begin_processing(&self, id: &str) -> Result<(), StoreError> {
        self.transition(id, FileStatus::Pending, FileStatus::Processing, None)
    }

    /// Transitions `Processing → Success`, setting `processed_at`.
    pub fn complete(&self, id: &str, note: &str) -> Result<(), StoreError> {
        self.transition(id, FileStatus::Processing, FileStatus::Success, Some(note))
    }

    /// Transitions `Processing → Failed`, setting `processed_at`.
    pub fn fail(&self, id: &str, note: &str) -> Result<(), StoreError> {
        self.transition(id, FileStatus::Processing, FileStatus::Failed, Some(note))
    }

    fn transition(
        &self,
        id: &str,
        from: FileStatus,
        to: FileStatus,
        note: Option<&str>,
    ) -> Result<(), StoreError> {
        let now = format_timestamp(Utc::now());
        let processed_at = to.is_terminal().then_some(now.as_str());

        let applied = file_repo::transition(
            &self.db,
            id,
            from.as_str(),
            to.as_str(),
            note,
            processed_at,
            &now,
        )?;

        if applied {
            log::debug!("Record {} transitioned {:?} -> {:?}", id, from, to);
            return Ok(());
        }

        // The conditional update missed; report what the record actually is.
        match file_repo::find_by_id(&self.db, id)? {
            None => Err(StoreError::NotFound { id: id.to_string() }),
            Some(row) => Err(StoreError::InvalidTransition {
                id: id.to_string(),
                expected: from,
                actual: FileStatus::parse(&row.status).unwrap_or(FileStatus::Pending),
            }),
        }
    }

    /// Records one processing invocation against the record.
    pub fn record_attempt(&self, id: &str) -> Result<(), StoreError> {
        let now = format_timestamp(Utc::now());
        file_repo::record_attempt(&self.db, id, &now)?;
        Ok(())
    }

    /// Re-queues `Processing` records untouched for longer than `threshold`.
    ///
    /// Run at startup: a record left in `Processing` by a crashed process
    /// is presumed abandoned once it exceeds the staleness threshold and
    /// goes back to `Pending` for a fresh attempt.
    pub fn requeue_stale(&self, threshold: Duration) -> Result<Vec<String>, StoreError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(threshold).unwrap_or_else(|_| chrono::Duration::zero());
        let now = format_timestamp(Utc::now());

        let ids = file_repo::requeue_stale(&self.db, &format_timestamp(cutoff), &now)?;
        if !ids.is_empty() {
            log::info!("Re-queued {} stale processing record(s)", ids.len());
        }
        Ok(ids)
    }

    /// Paged listing ordered by creation time. `page` is 1-based and
    /// clamps to the last valid page.
    pub fn list(&self, page: u64, page_size: u64) -> Result<(Vec<FileRecord>, u64), StoreError> {
        let (rows, total) = file_repo::list_page(&self.db, page, page_size)?;
        Ok((rows.iter().map(FileRecord::from_row).collect(), total))
    }

    /// Point-in-time counts per state.
    pub fn summary(&self) -> Result<StatusSummary, StoreError> {
        Ok(stats_repo::summary(&self.db)?)
    }

    /// Time-bucketed arrival/completion series.
    pub fn trend(&self, bucket: TrendBucket) -> Result<Vec<TrendPoint>, StoreError> {
        Ok(stats_repo::trend(&self.db, bucket)?)
    }
}
