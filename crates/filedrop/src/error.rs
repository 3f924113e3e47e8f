use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FiledropError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Processing error: {0}")]
    Process(#[from] crate::processor::ProcessError),

    #[error("Store error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Cannot watch '{path}': {reason}")]
    WatchSetup { path: PathBuf, reason: String },

    #[error("Record {record_id} is already queued or running")]
    AlreadyQueued { record_id: String },

    #[error("Worker channel closed unexpectedly")]
    ChannelClosed,

    #[error("Directory scan failed for '{path}': {source}")]
    ScanFailed {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("Watch error: {0}")]
    WatchError(String),
}

impl WorkerError {
    /// True for submission collisions, which callers treat as a no-op.
    pub fn is_already_queued(&self) -> bool {
        matches!(self, WorkerError::AlreadyQueued { .. })
    }
}

pub type Result<T> = std::result::Result<T, FiledropError>;
