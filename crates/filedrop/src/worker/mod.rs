pub mod job;
pub mod pool;
pub mod watcher;

pub use job::{Job, JobResult};
pub use pool::{RetryPolicy, WorkerPool};
pub use watcher::DirectoryWatcher;
