//! The pluggable per-file unit of work.
//!
//! The executor only cares about the error classification: transient
//! failures are retried with backoff, permanent ones go straight to a
//! terminal `Failed` record.

use std::io::ErrorKind;
use std::path::Path;

use thiserror::Error;

/// Failure classification reported by a unit of work.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessError {
    /// Worth retrying: I/O busy, resource temporarily unavailable.
    #[error("{0}")]
    Transient(String),

    /// Not worth retrying: bad input, missing file.
    #[error("{0}")]
    Permanent(String),
}

impl ProcessError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProcessError::Transient(_))
    }

    /// Classifies an I/O error by its kind.
    pub fn from_io(err: &std::io::Error) -> Self {
        match err.kind() {
            ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut => {
                ProcessError::Transient(err.to_string())
            }
            _ => ProcessError::Permanent(err.to_string()),
        }
    }
}

/// A unit of work invoked once per processing attempt.
///
/// `Ok` carries an optional note for the record (usually empty).
/// Implementations must be safe to re-run: the executor guarantees
/// at-least-once invocation, not exactly-once.
pub trait Processor: Send + Sync {
    fn process(&self, path: &Path) -> Result<String, ProcessError>;
}

impl<F> Processor for F
where
    F: Fn(&Path) -> Result<String, ProcessError> + Send + Sync,
{
    fn process(&self, path: &Path) -> Result<String, ProcessError> {
        self(path)
    }
}

/// Default unit of work: verifies the dropped file is present, readable
/// and non-empty. Files still being written show up as empty or
/// unreadable and fail here rather than silently passing.
#[derive(Debug, Default)]
pub struct ReadCheck;

impl Processor for ReadCheck {
    fn process(&self, path: &Path) -> Result<String, ProcessError> {
        let metadata = std::fs::metadata(path).map_err(|e| ProcessError::from_io(&e))?;

        if !metadata.is_file() {
            return Err(ProcessError::Permanent(format!(
                "not a regular file: {}",
                path.display()
            )));
        }

        if metadata.len() == 0 {
            return Err(ProcessError::Permanent("empty file".to_string()));
        }

        std::fs::File::open(path).map_err(|e| ProcessError::from_io(&e))?;

        Ok(String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_check_accepts_nonempty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("b.csv");
        std::fs::write(&path, b"a,b,c\n1,2,3\n").unwrap();

        let note = ReadCheck.process(&path).unwrap();
        assert_eq!(note, "");
    }

    #[test]
    fn test_read_check_rejects_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"").unwrap();

        let err = ReadCheck.process(&path).unwrap_err();
        assert_eq!(err, ProcessError::Permanent("empty file".to_string()));
    }

    #[test]
    fn test_read_check_rejects_missing_file() {
        let err = ReadCheck
            .process(std::path::Path::new("/nonexistent/x.txt"))
            .unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn test_read_check_rejects_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = ReadCheck.process(dir.path()).unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn test_io_error_classification() {
        let busy = std::io::Error::new(ErrorKind::WouldBlock, "busy");
        assert!(ProcessError::from_io(&busy).is_transient());

        let missing = std::io::Error::new(ErrorKind::NotFound, "gone");
        assert!(!ProcessError::from_io(&missing).is_transient());
    }

    #[test]
    fn test_closure_processor() {
        let unit = |_: &Path| Ok("checked".to_string());
        let note = unit.process(std::path::Path::new("/anything")).unwrap();
        assert_eq!(note, "checked");
    }
}
