use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::errors::{SearchError, SearchResult};
use crate::storage;

/// Separates the parent identifier from the variant suffix in a composite job id
pub const PARENT_DELIMITER: char = '|';

/// One query submitted for search
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Job {
    /// Identifier derived from the base name of the query file
    pub id: String,
    /// Path to the query molecule file
    pub source_path: PathBuf,
}

impl Job {
    /// Builds a job whose id is the file stem of `path`.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let source_path = path.into();
        let id = source_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self { id, source_path }
    }

    /// Parent identifier encoded as the prefix of a composite id
    pub fn parent_id(&self) -> &str {
        self.id
            .split(PARENT_DELIMITER)
            .next()
            .unwrap_or(self.id.as_str())
    }

    pub fn path_string(&self) -> String {
        self.source_path.display().to_string()
    }
}

/// A contiguous slice of the job list handed to exactly one worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Position of this chunk in the partition
    pub index: usize,
    pub jobs: Vec<Job>,
}

impl Chunk {
    /// Name of the per-chunk working directory under the result directory
    pub fn name(&self) -> String {
        format!("chunk-{:04}", self.index)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// Splits `jobs` into contiguous chunks of at most `chunk_size` jobs.
///
/// Concatenating the chunks in index order reproduces `jobs` exactly; only the
/// last chunk may be shorter than `chunk_size`.
pub fn partition(jobs: &[Job], chunk_size: NonZeroUsize) -> Vec<Chunk> {
    jobs.chunks(chunk_size.get())
        .enumerate()
        .map(|(index, slice)| Chunk {
            index,
            jobs: slice.to_vec(),
        })
        .collect()
}

/// Reads a line-oriented job list, optionally restricted to the 1-based
/// inclusive record range `start_record..=end_record`.
///
/// The range only applies when both bounds are given; bounds past the end of
/// the list are clamped.
pub fn load_job_list(
    path: &Path,
    start_record: Option<usize>,
    end_record: Option<usize>,
) -> SearchResult<Vec<Job>> {
    let paths = storage::import_list(path).map_err(|e| {
        SearchError::invalid_job_list(format!("cannot read {}: {}", path.display(), e))
    })?;
    debug!("Read job list {} ({} records)", path.display(), paths.len());

    let selected = match (start_record, end_record) {
        (Some(start), Some(end)) if start >= 1 => {
            let lo = (start - 1).min(paths.len());
            let hi = end.min(paths.len()).max(lo);
            &paths[lo..hi]
        }
        _ => &paths[..],
    };

    Ok(selected.iter().map(Job::from_path).collect())
}

/// Collects jobs for every file matching a glob pattern, sorted by path.
pub fn jobs_from_glob(pattern: &str) -> SearchResult<Vec<Job>> {
    let entries = glob::glob(pattern)
        .map_err(|e| SearchError::config_error(format!("Invalid glob '{}': {}", pattern, e)))?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .filter(|p| p.is_file())
        .collect();
    paths.sort();

    info!("Glob '{}' matched {} query files", pattern, paths.len());
    Ok(paths.into_iter().map(Job::from_path).collect())
}
