//! Read-side aggregation queries over the `files` table.
//!
//! Both queries are read-only and recomputed per call; nothing here
//! mutates record state.

use std::collections::BTreeMap;

use rusqlite::params;
use serde::Serialize;

use super::{Database, DatabaseError};
use crate::config::TrendBucket;

/// Point-in-time counts per lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSummary {
    pub total: u64,
    pub pending: u64,
    pub processing: u64,
    pub success: u64,
    pub failed: u64,
}

/// Returns counts over the current table snapshot.
///
/// A single SQL statement reads every row's status exactly once, so the
/// counts always sum to `total` even with concurrent writers.
pub fn summary(db: &Database) -> Result<StatusSummary, DatabaseError> {
    db.run(|conn| {
        let row = conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(status = 'pending'), 0),
                    COALESCE(SUM(status = 'processing'), 0),
                    COALESCE(SUM(status = 'success'), 0),
                    COALESCE(SUM(status = 'failed'), 0)
             FROM files",
            [],
            |r| {
                Ok(StatusSummary {
                    total: r.get(0)?,
                    pending: r.get(1)?,
                    processing: r.get(2)?,
                    success: r.get(3)?,
                    failed: r.get(4)?,
                })
            },
        )?;
        Ok(row)
    })
}

/// One interval in a trend series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendPoint {
    pub time: String,
    pub pending: u64,
    pub success: u64,
    pub failed: u64,
}

/// Returns the trend series at the given bucket width, ordered by time.
///
/// Arrivals are bucketed by `created_at`, completions by `processed_at`,
/// so one record can contribute to two buckets (arrived in one interval,
/// finished in a later one).
pub fn trend(db: &Database, bucket: TrendBucket) -> Result<Vec<TrendPoint>, DatabaseError> {
    let fmt = bucket.strftime_format();

    db.run(|conn| {
        let mut points: BTreeMap<String, TrendPoint> = BTreeMap::new();

        let mut stmt = conn.prepare(
            "SELECT strftime(?1, created_at), COUNT(*) FROM files GROUP BY 1",
        )?;
        let arrivals = stmt.query_map(params![fmt], |row| {
            Ok((row.get::<_, Option<String>>(0)?, row.get::<_, u64>(1)?))
        })?;
        for entry in arrivals {
            let (time, count) = entry?;
            // strftime returns NULL for unparseable timestamps; skip those rows.
            let Some(time) = time else { continue };
            points
                .entry(time.clone())
                .or_insert_with(|| TrendPoint {
                    time,
                    pending: 0,
                    success: 0,
                    failed: 0,
                })
                .pending = count;
        }

        let mut stmt = conn.prepare(
            "SELECT strftime(?1, processed_at), status, COUNT(*) FROM files
             WHERE processed_at IS NOT NULL AND status IN ('success', 'failed')
             GROUP BY 1, 2",
        )?;
        let completions = stmt.query_map(params![fmt], |row| {
            Ok((
                row.get::<_, Option<String>>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, u64>(2)?,
            ))
        })?;
        for entry in completions {
            let (time, status, count) = entry?;
            let Some(time) = time else { continue };
            let point = points.entry(time.clone()).or_insert_with(|| TrendPoint {
                time,
                pending: 0,
                success: 0,
                failed: 0,
            });
            match status.as_str() {
                "success" => point.success = count,
                "failed" => point.failed = count,
                _ => {}
            }
        }

        Ok(points.into_values().collect())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::file_repo::{self, FileRow};

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    fn row(id: &str, status: &str, created_at: &str, processed_at: Option<&str>) -> FileRow {
        FileRow {
            id: id.to_string(),
            path: format!("/drop/{}.txt", id),
            filename: format!("{}.txt", id),
            status: status.to_string(),
            note: String::new(),
            attempts: 0,
            created_at: created_at.to_string(),
            updated_at: created_at.to_string(),
            processed_at: processed_at.map(|s| s.to_string()),
        }
    }

    #[test]
    fn test_summary_empty() {
        let db = test_db();
        let s = summary(&db).unwrap();
        assert_eq!(
            s,
            StatusSummary {
                total: 0,
                pending: 0,
                processing: 0,
                success: 0,
                failed: 0
            }
        );
    }

    #[test]
    fn test_summary_counts_sum_to_total() {
        let db = test_db();
        file_repo::insert(&db, &row("a", "pending", "2026-01-01T10:00:00Z", None)).unwrap();
        file_repo::insert(&db, &row("b", "processing", "2026-01-01T10:00:00Z", None)).unwrap();
        file_repo::insert(
            &db,
            &row("c", "success", "2026-01-01T10:00:00Z", Some("2026-01-01T10:05:00Z")),
        )
        .unwrap();
        file_repo::insert(
            &db,
            &row("d", "failed", "2026-01-01T10:00:00Z", Some("2026-01-01T10:06:00Z")),
        )
        .unwrap();

        let s = summary(&db).unwrap();
        assert_eq!(s.total, 4);
        assert_eq!(s.pending + s.processing + s.success + s.failed, s.total);
        assert_eq!(s.pending, 1);
        assert_eq!(s.processing, 1);
        assert_eq!(s.success, 1);
        assert_eq!(s.failed, 1);
    }

    #[test]
    fn test_trend_hourly_buckets() {
        let db = test_db();
        file_repo::insert(&db, &row("a", "pending", "2026-01-01T10:15:00Z", None)).unwrap();
        file_repo::insert(&db, &row("b", "pending", "2026-01-01T10:45:00Z", None)).unwrap();
        file_repo::insert(
            &db,
            &row("c", "success", "2026-01-01T10:50:00Z", Some("2026-01-01T11:05:00Z")),
        )
        .unwrap();
        file_repo::insert(
            &db,
            &row("d", "failed", "2026-01-01T11:10:00Z", Some("2026-01-01T11:12:00Z")),
        )
        .unwrap();

        let series = trend(&db, TrendBucket::Hour).unwrap();
        assert_eq!(series.len(), 2);

        // Ordered by time.
        assert_eq!(series[0].time, "2026-01-01T10:00");
        assert_eq!(series[1].time, "2026-01-01T11:00");

        // Three arrivals in the 10:00 bucket, one in 11:00.
        assert_eq!(series[0].pending, 3);
        assert_eq!(series[1].pending, 1);

        // Both completions land in the 11:00 bucket.
        assert_eq!(series[0].success, 0);
        assert_eq!(series[1].success, 1);
        assert_eq!(series[1].failed, 1);
    }

    #[test]
    fn test_trend_minute_buckets() {
        let db = test_db();
        file_repo::insert(&db, &row("a", "pending", "2026-01-01T10:15:10Z", None)).unwrap();
        file_repo::insert(&db, &row("b", "pending", "2026-01-01T10:15:50Z", None)).unwrap();
        file_repo::insert(&db, &row("c", "pending", "2026-01-01T10:16:00Z", None)).unwrap();

        let series = trend(&db, TrendBucket::Minute).unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].time, "2026-01-01T10:15");
        assert_eq!(series[0].pending, 2);
        assert_eq!(series[1].pending, 1);
    }

    #[test]
    fn test_trend_empty() {
        let db = test_db();
        assert!(trend(&db, TrendBucket::Day).unwrap().is_empty());
    }

    #[test]
    fn test_trend_is_restartable() {
        let db = test_db();
        file_repo::insert(&db, &row("a", "pending", "2026-01-01T10:00:00Z", None)).unwrap();

        let first = trend(&db, TrendBucket::Day).unwrap();
        let second = trend(&db, TrendBucket::Day).unwrap();
        assert_eq!(first, second);

        // Each call recomputes from the store.
        file_repo::insert(&db, &row("b", "pending", "2026-01-02T10:00:00Z", None)).unwrap();
        let third = trend(&db, TrendBucket::Day).unwrap();
        assert_eq!(third.len(), 2);
    }
}
