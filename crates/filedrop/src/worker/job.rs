use std::path::PathBuf;

/// A processing request for one file record.
#[derive(Debug, Clone)]
pub struct Job {
    pub record_id: String,
    pub path: PathBuf,
    /// Zero-based invocation counter; bumped on each transient retry.
    pub attempt: u32,
}

impl Job {
    pub fn new(record_id: String, path: PathBuf) -> Self {
        Self {
            record_id,
            path,
            attempt: 0,
        }
    }

    pub fn next_attempt(&self) -> Self {
        Self {
            record_id: self.record_id.clone(),
            path: self.path.clone(),
            attempt: self.attempt + 1,
        }
    }
}

/// Outcome of a finished job, emitted on the pool's result channel.
#[derive(Debug)]
pub struct JobResult {
    pub record_id: String,
    pub path: PathBuf,
    pub success: bool,
    pub note: String,
    pub attempts: u32,
}

impl JobResult {
    pub fn success(job: &Job, note: String) -> Self {
        Self {
            record_id: job.record_id.clone(),
            path: job.path.clone(),
            success: true,
            note,
            attempts: job.attempt + 1,
        }
    }

    pub fn failure(job: &Job, note: String) -> Self {
        Self {
            record_id: job.record_id.clone(),
            path: job.path.clone(),
            success: false,
            note,
            attempts: job.attempt + 1,
        }
    }
}
