//! Component wiring and lifecycle.
//!
//! Explicit construction at startup: config → database → store → pool →
//! watcher. The service owns the worker pool's lifetime and shuts it down
//! explicitly.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::config::Config;
use crate::db::stats_repo::{StatusSummary, TrendPoint};
use crate::db::Database;
use crate::error::Result;
use crate::processor::Processor;
use crate::store::{FileRecord, StatusStore};
use crate::worker::{DirectoryWatcher, Job, RetryPolicy, WorkerPool};

pub struct IngestService {
    config: Config,
    store: StatusStore,
    pool: Option<Arc<WorkerPool>>,
    shutdown: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl IngestService {
    pub fn new(config: Config, db: Database) -> Self {
        Self {
            config,
            store: StatusStore::new(db),
            pool: None,
            shutdown: Arc::new(AtomicBool::new(false)),
            threads: Vec::new(),
        }
    }

    pub fn store(&self) -> &StatusStore {
        &self.store
    }

    /// Point-in-time counts, for the dashboard/API layer.
    pub fn summary(&self) -> Result<StatusSummary> {
        Ok(self.store.summary()?)
    }

    /// Time-bucketed trend series, for the dashboard/API layer.
    pub fn trend(&self) -> Result<Vec<TrendPoint>> {
        Ok(self.store.trend(self.config.trend_bucket)?)
    }

    /// Paged record listing, for the dashboard/API layer.
    pub fn list(&self, page: u64, page_size: u64) -> Result<(Vec<FileRecord>, u64)> {
        Ok(self.store.list(page, page_size)?)
    }

    /// Starts the pipeline: reconciliation pass, worker pool, initial
    /// sweep, then background watching.
    ///
    /// A watch-setup failure (missing or inaccessible directory) is
    /// reported to the operator but does not abort the rest of the
    /// pipeline; reconciled jobs still run.
    pub fn start(&mut self, processor: Arc<dyn Processor>) -> Result<()> {
        let policy = RetryPolicy {
            max_retries: self.config.max_retries,
            backoff: self.config.retry_backoff(),
        };
        let pool = Arc::new(WorkerPool::new(
            self.store.clone(),
            processor,
            self.config.worker_count,
            policy,
        ));
        self.pool = Some(Arc::clone(&pool));
        self.shutdown.store(false, Ordering::Relaxed);

        // Records stuck in Processing from a previous run go back to
        // Pending and get a fresh attempt.
        match self.store.requeue_stale(self.config.stale_after()) {
            Ok(ids) => {
                for id in ids {
                    match self.store.get(&id) {
                        Ok(Some(record)) => {
                            submit_record(&pool, &record.id, PathBuf::from(&record.path));
                        }
                        Ok(None) => {}
                        Err(e) => error!("Failed to load re-queued record {}: {}", id, e),
                    }
                }
            }
            Err(e) => error!("Reconciliation pass failed: {}", e),
        }

        let watcher = match DirectoryWatcher::new(
            self.config.watch_path(),
            self.config.recursive,
            self.config.debounce(),
        ) {
            Ok(watcher) => watcher,
            Err(e) => {
                error!("Watcher not started: {}", e);
                self.spawn_result_consumer(Arc::clone(&pool));
                return Ok(());
            }
        };

        // Initial sweep picks up files dropped while the process was down.
        match watcher.scan() {
            Ok(paths) => {
                for path in paths {
                    ingest_path(&self.store, &pool, path);
                }
            }
            Err(e) => error!("Initial scan failed: {}", e),
        }

        self.spawn_result_consumer(Arc::clone(&pool));

        let watch_store = self.store.clone();
        let watch_pool = Arc::clone(&pool);
        let watch_shutdown = Arc::clone(&self.shutdown);
        let handle = std::thread::spawn(move || {
            let result = watcher.watch(
                move |path| ingest_path(&watch_store, &watch_pool, path),
                watch_shutdown,
            );
            if let Err(e) = result {
                error!("Watcher stopped with error: {}", e);
            }
        });
        self.threads.push(handle);

        info!(
            "Ingest pipeline started on {} with {} worker(s)",
            self.config.watch_directory, self.config.worker_count
        );
        Ok(())
    }

    /// Consumes job results so the channel never fills up, logging outcomes.
    fn spawn_result_consumer(&mut self, pool: Arc<WorkerPool>) {
        let shutdown = Arc::clone(&self.shutdown);
        let handle = std::thread::spawn(move || {
            while !shutdown.load(Ordering::Relaxed) {
                if let Some(result) = pool.try_recv_result() {
                    if result.success {
                        info!(
                            "Processed {} after {} attempt(s)",
                            result.path.display(),
                            result.attempts
                        );
                    } else {
                        warn!(
                            "Failed {} after {} attempt(s): {}",
                            result.path.display(),
                            result.attempts,
                            result.note
                        );
                    }
                } else {
                    std::thread::sleep(Duration::from_millis(100));
                }
            }
            debug!("Result consumer shutting down");
        });
        self.threads.push(handle);
    }

    /// Stops watching, lets in-flight jobs finish, and joins all threads.
    /// No new records are created after this is called.
    pub fn stop(&mut self) {
        info!("Stopping ingest pipeline...");
        self.shutdown.store(true, Ordering::Relaxed);

        if let Some(pool) = &self.pool {
            pool.shutdown();
        }

        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                error!("Background thread panicked during shutdown");
            }
        }

        if let Some(pool) = self.pool.take() {
            match Arc::try_unwrap(pool) {
                Ok(pool) => pool.wait(),
                Err(_) => warn!("Worker pool still shared at shutdown, not joining workers"),
            }
        }

        info!("Ingest pipeline stopped");
    }
}

/// Turns one observed path into durable work: reuse the live record for
/// the path if there is one, otherwise create a fresh Pending record
/// (a re-appearance after a terminal record is a new logical arrival).
fn ingest_path(store: &StatusStore, pool: &WorkerPool, path: PathBuf) {
    let record_id = match store.find_live_by_path(&path) {
        Ok(Some(live)) => live.id,
        Ok(None) => match store.create(&path) {
            Ok(record) => record.id,
            Err(e) => {
                // Intake halts for this event; the watcher keeps running
                // and the next event retries the store.
                error!("Failed to create record for {}: {}", path.display(), e);
                return;
            }
        },
        Err(e) => {
            error!("Failed to look up record for {}: {}", path.display(), e);
            return;
        }
    };

    submit_record(pool, &record_id, path);
}

fn submit_record(pool: &WorkerPool, record_id: &str, path: PathBuf) {
    match pool.submit(Job::new(record_id.to_string(), path)) {
        Ok(()) => {}
        Err(e) if e.is_already_queued() => {
            debug!("Record {} already in flight", record_id);
        }
        Err(e) => error!("Failed to submit record {}: {}", record_id, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::time::Instant;

    use crate::processor::ProcessError;
    use crate::store::FileStatus;

    fn test_config(watch_dir: &Path) -> Config {
        crate::config::load_config_from_str(&format!(
            r#"{{
                "version": "1",
                "watch_directory": "{}",
                "worker_count": 2,
                "max_retries": 1,
                "retry_backoff_ms": 5,
                "debounce_ms": 100,
                "stale_after_secs": 0
            }}"#,
            watch_dir.display()
        ))
        .unwrap()
    }

    fn wait_until<F: Fn() -> bool>(what: &str, cond: F) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "timed out waiting for {}", what);
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    #[test]
    fn test_initial_scan_processes_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"alpha").unwrap();
        std::fs::write(dir.path().join("b.csv"), b"1,2").unwrap();

        let mut service = IngestService::new(
            test_config(dir.path()),
            Database::open_in_memory().unwrap(),
        );
        service
            .start(Arc::new(|_: &Path| Ok(String::new())))
            .unwrap();

        let store = service.store().clone();
        wait_until("all records terminal", || {
            let s = store.summary().unwrap();
            s.total == 2 && s.success == 2
        });

        service.stop();

        let summary = store.summary().unwrap();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.success, 2);
        assert_eq!(summary.pending + summary.processing + summary.failed, 0);
    }

    #[test]
    fn test_reconciliation_requeues_stale_processing() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();
        let store = StatusStore::new(db.clone());

        // Simulate a crash: a record left in Processing from a prior run.
        let orphan_path = dir.path().join("orphan.txt");
        std::fs::write(&orphan_path, b"data").unwrap();
        let record = store.create(&orphan_path).unwrap();
        store.begin_processing(&record.id).unwrap();
        std::thread::sleep(Duration::from_millis(5));

        let mut service = IngestService::new(test_config(dir.path()), db);
        service
            .start(Arc::new(|_: &Path| Ok(String::new())))
            .unwrap();

        let watch_store = service.store().clone();
        let id = record.id.clone();
        wait_until("orphan record terminal", || {
            watch_store
                .get(&id)
                .unwrap()
                .map(|r| r.status.is_terminal())
                .unwrap_or(false)
        });

        service.stop();

        let done = watch_store.get(&record.id).unwrap().unwrap();
        assert_eq!(done.status, FileStatus::Success);
    }

    #[test]
    fn test_missing_watch_directory_does_not_crash() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let mut service = IngestService::new(
            test_config(&missing),
            Database::open_in_memory().unwrap(),
        );

        // Watcher setup fails, reported but non-fatal.
        service
            .start(Arc::new(|_: &Path| Ok(String::new())))
            .unwrap();
        service.stop();
    }

    #[test]
    fn test_ingest_path_dedupes_live_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"data").unwrap();

        let store = StatusStore::new(Database::open_in_memory().unwrap());
        let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);
        let pool = WorkerPool::new(
            store.clone(),
            Arc::new(move |_: &Path| {
                gate_rx.recv().ok();
                Ok(String::new())
            }),
            1,
            RetryPolicy::default(),
        );

        // Two debounced events for the same path before the first job
        // finishes yield exactly one record and one in-flight job.
        ingest_path(&store, &pool, path.clone());
        ingest_path(&store, &pool, path.clone());

        let (_, total) = store.list(1, 10).unwrap();
        assert_eq!(total, 1);
        assert_eq!(pool.in_flight_count(), 1);

        gate_tx.send(()).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while pool.in_flight_count() > 0 {
            assert!(Instant::now() < deadline);
            std::thread::sleep(Duration::from_millis(10));
        }

        pool.shutdown();
        pool.wait();
    }

    #[test]
    fn test_reappearance_after_terminal_creates_new_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"data").unwrap();

        let store = StatusStore::new(Database::open_in_memory().unwrap());
        let pool = WorkerPool::new(
            store.clone(),
            Arc::new(|_: &Path| Ok(String::new())),
            1,
            RetryPolicy::default(),
        );

        ingest_path(&store, &pool, path.clone());
        let deadline = Instant::now() + Duration::from_secs(5);
        while pool.in_flight_count() > 0 {
            assert!(Instant::now() < deadline);
            std::thread::sleep(Duration::from_millis(10));
        }

        // The file shows up again after its record went terminal.
        ingest_path(&store, &pool, path.clone());

        let (_, total) = store.list(1, 10).unwrap();
        assert_eq!(total, 2);

        pool.shutdown();
        pool.wait();
    }

    #[test]
    fn test_failure_detail_lands_in_note() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"").unwrap();

        let mut service = IngestService::new(
            test_config(dir.path()),
            Database::open_in_memory().unwrap(),
        );
        service
            .start(Arc::new(|_: &Path| {
                Err(ProcessError::Permanent("empty file".to_string()))
            }))
            .unwrap();

        let store = service.store().clone();
        wait_until("record failed", || {
            store.summary().map(|s| s.failed == 1).unwrap_or(false)
        });

        service.stop();

        let (records, _) = store.list(1, 10).unwrap();
        assert_eq!(records[0].status, FileStatus::Failed);
        assert_eq!(records[0].note, "empty file");
        assert!(records[0].processed_at.is_some());
    }
}
