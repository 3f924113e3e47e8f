use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use notify::{Config as NotifyConfig, PollWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer_opt, Config as DebouncerConfig, DebouncedEventKind};
use walkdir::WalkDir;

use crate::error::WorkerError;

/// Watches a directory for file appearances.
///
/// A single file write typically fires several OS notifications; the
/// debounce window collapses them into one logical event per path.
#[derive(Debug)]
pub struct DirectoryWatcher {
    watch_directory: PathBuf,
    recursive: bool,
    debounce: Duration,
}

impl DirectoryWatcher {
    /// Fails with `WorkerError::WatchSetup` if the path is missing or not
    /// a directory.
    pub fn new<P: AsRef<Path>>(
        watch_directory: P,
        recursive: bool,
        debounce: Duration,
    ) -> Result<Self, WorkerError> {
        let watch_directory = watch_directory.as_ref().to_path_buf();

        if !watch_directory.exists() {
            return Err(WorkerError::WatchSetup {
                path: watch_directory,
                reason: "path does not exist".to_string(),
            });
        }
        if !watch_directory.is_dir() {
            return Err(WorkerError::WatchSetup {
                path: watch_directory,
                reason: "path is not a directory".to_string(),
            });
        }

        Ok(Self {
            watch_directory,
            recursive,
            debounce,
        })
    }

    pub fn watch_directory(&self) -> &Path {
        &self.watch_directory
    }

    /// Sweeps the directory for files already present, so files dropped
    /// while the process was down are still ingested.
    pub fn scan(&self) -> Result<Vec<PathBuf>, WorkerError> {
        let mut paths = Vec::new();

        let max_depth = if self.recursive { usize::MAX } else { 1 };
        for entry in WalkDir::new(&self.watch_directory)
            .min_depth(1)
            .max_depth(max_depth)
        {
            let entry = entry.map_err(|e| WorkerError::ScanFailed {
                path: self.watch_directory.clone(),
                source: e,
            })?;
            let path = entry.path();

            if path.is_dir() {
                continue;
            }

            // Skip hidden files (editor swap files, .DS_Store and friends).
            if is_hidden(path) {
                continue;
            }

            debug!("Found file: {}", path.display());
            paths.push(path.to_path_buf());
        }

        info!(
            "Scanned {} file(s) in {}",
            paths.len(),
            self.watch_directory.display()
        );
        Ok(paths)
    }

    /// Blocks watching for file events until `shutdown` is set, invoking
    /// `callback` once per debounced appearance.
    pub fn watch<F>(&self, callback: F, shutdown: Arc<AtomicBool>) -> Result<(), WorkerError>
    where
        F: Fn(PathBuf) + Send + 'static,
    {
        let watch_dir = self.watch_directory.clone();
        let mode = if self.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };

        // Use PollWatcher for Docker/NFS compatibility
        let poll_config = NotifyConfig::default().with_poll_interval(Duration::from_secs(2));

        let debouncer_config = DebouncerConfig::default()
            .with_timeout(self.debounce)
            .with_notify_config(poll_config);

        let (tx, rx) = std::sync::mpsc::channel();

        let mut debouncer = new_debouncer_opt::<_, PollWatcher>(debouncer_config, tx)
            .map_err(|e| WorkerError::WatchError(e.to_string()))?;

        debouncer
            .watcher()
            .watch(&watch_dir, mode)
            .map_err(|e| WorkerError::WatchError(e.to_string()))?;

        info!("Watching directory: {}", watch_dir.display());

        loop {
            if shutdown.load(Ordering::Relaxed) {
                info!("Watch mode shutting down...");
                break;
            }

            match rx.recv_timeout(Duration::from_millis(100)) {
                Ok(Ok(events)) => {
                    for event in events {
                        if matches!(event.kind, DebouncedEventKind::Any) {
                            let path = &event.path;

                            if path.is_dir() {
                                continue;
                            }

                            if is_hidden(path) {
                                continue;
                            }

                            // The path may have vanished between the event
                            // and the debounce window closing.
                            if path.exists() {
                                debug!("File event: {}", path.display());
                                callback(path.to_path_buf());
                            }
                        }
                    }
                }
                Ok(Err(errors)) => {
                    warn!("Watch error: {:?}", errors);
                }
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                    continue;
                }
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    error!("Watch channel disconnected");
                    break;
                }
            }
        }

        Ok(())
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}
