//! Error types shared by the orchestrator, the isolated runner and the indexes.
//!
//! Only configuration problems detected before any worker launches are returned
//! as `Err` from the pool. Per-job and per-chunk failures are recovered locally
//! and reported through [`crate::results::WorkerResult`] instead.
use std::path::PathBuf;
use thiserror::Error;

/// Result type for search operations
pub type SearchResult<T> = Result<T, SearchError>;

/// Errors that can occur while preparing or running a search batch
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Invalid job list: {0}")]
    InvalidJobList(String),
    #[error("Search engine error: {0}")]
    EngineError(String),
    #[error("Process error: {0}")]
    ProcessError(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl SearchError {
    pub fn file_not_found(path: impl Into<PathBuf>) -> Self {
        Self::FileNotFound(path.into())
    }

    pub fn permission_denied(path: impl Into<PathBuf>) -> Self {
        Self::PermissionDenied(path.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn invalid_job_list(msg: impl Into<String>) -> Self {
        Self::InvalidJobList(msg.into())
    }

    pub fn engine_error(msg: impl Into<String>) -> Self {
        Self::EngineError(msg.into())
    }

    pub fn process_error(msg: impl Into<String>) -> Self {
        Self::ProcessError(msg.into())
    }

    /// Maps an io error on `path` to the most specific variant.
    pub fn from_io(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::file_not_found(path),
            std::io::ErrorKind::PermissionDenied => Self::permission_denied(path),
            _ => Self::IoError(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_error_creation() {
        let path = Path::new("query.mol2");
        let err = SearchError::file_not_found(path);
        assert!(matches!(err, SearchError::FileNotFound(_)));

        let err = SearchError::permission_denied(path);
        assert!(matches!(err, SearchError::PermissionDenied(_)));

        let err = SearchError::engine_error("engine crashed");
        assert!(matches!(err, SearchError::EngineError(_)));

        let err = SearchError::process_error("timed out");
        assert!(matches!(err, SearchError::ProcessError(_)));
    }

    #[test]
    fn test_error_messages() {
        let err = SearchError::config_error("chunk_size must be at least 1");
        assert_eq!(
            err.to_string(),
            "Configuration error: chunk_size must be at least 1"
        );

        let err = SearchError::invalid_job_list("job list is empty");
        assert_eq!(err.to_string(), "Invalid job list: job list is empty");

        let err = SearchError::file_not_found("query.mol2");
        assert_eq!(err.to_string(), "File not found: query.mol2");
    }

    #[test]
    fn test_from_io_maps_kinds() {
        let err = SearchError::from_io(
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
            "a.list",
        );
        assert!(matches!(err, SearchError::FileNotFound(p) if p == Path::new("a.list")));

        let err = SearchError::from_io(
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "no"),
            "a.list",
        );
        assert!(matches!(err, SearchError::PermissionDenied(_)));

        let err = SearchError::from_io(std::io::Error::new(std::io::ErrorKind::Other, "x"), "a");
        assert!(matches!(err, SearchError::IoError(_)));
    }
}
