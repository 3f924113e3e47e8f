use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    pub watch_directory: String,
    #[serde(default)]
    pub recursive: bool,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
    #[serde(default)]
    pub trend_bucket: TrendBucket,
    /// Overrides the default database location (`~/.filedrop/data/filedrop.db`).
    #[serde(default)]
    pub database_path: Option<String>,
}

fn default_worker_count() -> usize {
    num_cpus::get().min(8)
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_stale_after_secs() -> u64 {
    300
}

/// Fixed interval width for trend reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendBucket {
    Minute,
    #[default]
    Hour,
    Day,
}

impl TrendBucket {
    /// SQLite strftime format that truncates a timestamp to this bucket.
    pub fn strftime_format(&self) -> &'static str {
        match self {
            TrendBucket::Minute => "%Y-%m-%dT%H:%M",
            TrendBucket::Hour => "%Y-%m-%dT%H:00",
            TrendBucket::Day => "%Y-%m-%d",
        }
    }
}

impl Config {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn watch_path(&self) -> PathBuf {
        PathBuf::from(&self.watch_directory)
    }
}
