//! Cooperative cancellation through a sentinel file.
//!
//! Any process may create `STOP` inside the result directory at any time.
//! Workers poll it once per job boundary and never interrupt a job in flight,
//! so at most one extra job per worker runs after the request. No locking.
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::errors::{SearchError, SearchResult};
use crate::metrics::RunMetrics;

/// Name of the sentinel file that requests a cooperative stop
pub const STOP_FILE_NAME: &str = "STOP";

/// Source of a cooperative stop request
pub trait StopSignal: Send + Sync {
    fn should_stop(&self) -> bool;
}

/// Stop signal backed by the presence of `<result_dir>/STOP`
#[derive(Debug, Clone)]
pub struct SentinelStop {
    path: PathBuf,
}

impl SentinelStop {
    pub fn new(result_dir: &Path) -> Self {
        Self {
            path: result_dir.join(STOP_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StopSignal for SentinelStop {
    /// Only existence matters. Probe errors read as "not stopped".
    fn should_stop(&self) -> bool {
        self.path.try_exists().unwrap_or(false)
    }
}

/// Creates the sentinel in `result_dir`, asking running workers to stop.
pub fn request_stop(result_dir: &Path) -> SearchResult<PathBuf> {
    let path = result_dir.join(STOP_FILE_NAME);
    fs::create_dir_all(result_dir).map_err(|e| SearchError::from_io(e, result_dir))?;
    fs::write(&path, b"").map_err(|e| SearchError::from_io(e, &path))?;
    info!("Stop requested via {}", path.display());
    Ok(path)
}

/// Removes the sentinel so a new run can start. Returns whether one existed.
pub fn clear_stop(result_dir: &Path) -> SearchResult<bool> {
    let path = result_dir.join(STOP_FILE_NAME);
    match fs::remove_file(&path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(SearchError::from_io(e, path)),
    }
}

/// State shared by every worker of one run
#[derive(Clone)]
pub struct RunContext {
    result_dir: PathBuf,
    stop: Arc<dyn StopSignal>,
    metrics: RunMetrics,
}

impl RunContext {
    /// Context whose cancellation is the `STOP` sentinel in `result_dir`
    pub fn new(result_dir: impl Into<PathBuf>) -> Self {
        let result_dir = result_dir.into();
        let stop = Arc::new(SentinelStop::new(&result_dir));
        Self {
            result_dir,
            stop,
            metrics: RunMetrics::new(),
        }
    }

    pub fn with_stop(result_dir: impl Into<PathBuf>, stop: Arc<dyn StopSignal>) -> Self {
        Self {
            result_dir: result_dir.into(),
            stop,
            metrics: RunMetrics::new(),
        }
    }

    pub fn result_dir(&self) -> &Path {
        &self.result_dir
    }

    pub fn is_cancelled(&self) -> bool {
        self.stop.should_stop()
    }

    pub fn metrics(&self) -> &RunMetrics {
        &self.metrics
    }
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("result_dir", &self.result_dir)
            .finish_non_exhaustive()
    }
}
