pub mod config;
pub mod db;
pub mod error;
pub mod processor;
pub mod service;
pub mod store;
pub mod worker;

pub use config::{load_config, Config, TrendBucket};
pub use db::stats_repo::{StatusSummary, TrendPoint};
pub use db::Database;
pub use error::{ConfigError, FiledropError, Result, WorkerError};
pub use processor::{ProcessError, Processor, ReadCheck};
pub use service::IngestService;
pub use store::{FileRecord, FileStatus, StatusStore, StoreError};
pub use worker::{DirectoryWatcher, Job, JobResult, RetryPolicy, WorkerPool};
