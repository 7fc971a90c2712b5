//! Import and export of line lists and JSON records.
//!
//! Every export creates missing parent directories and replaces the target in
//! one rename, so a reader never observes a half-written file.
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::errors::{SearchError, SearchResult};

/// On-disk formats understood by the storage helpers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// One record per line, blank lines ignored on import
    List,
    /// Pretty-printed JSON document
    Json,
}

impl Format {
    /// File extension conventionally used for this format
    pub fn extension(self) -> &'static str {
        match self {
            Format::List => "list",
            Format::Json => "json",
        }
    }
}

/// Returns true when `path` exists. Errors while probing count as absent.
pub fn exists(path: &Path) -> bool {
    path.try_exists().unwrap_or(false)
}

/// Creates `path` and all of its parents.
pub fn mkdir(path: &Path) -> SearchResult<()> {
    fs::create_dir_all(path).map_err(|e| SearchError::from_io(e, path))
}

/// Reads a line-oriented list, trimming whitespace and skipping blank lines.
pub fn import_list(path: &Path) -> SearchResult<Vec<String>> {
    let contents = fs::read_to_string(path).map_err(|e| SearchError::from_io(e, path))?;
    let items: Vec<String> = contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();
    debug!("Imported {} records from {}", items.len(), path.display());
    Ok(items)
}

/// Writes one item per line, replacing any previous content.
pub fn export_list<S: AsRef<str>>(path: &Path, items: &[S]) -> SearchResult<()> {
    let mut buf = String::new();
    for item in items {
        buf.push_str(item.as_ref());
        buf.push('\n');
    }
    write_atomic(path, buf.as_bytes())?;
    debug!("Exported {} records to {}", items.len(), path.display());
    Ok(())
}

/// Deserializes a JSON document from `path`.
pub fn import_json<T: DeserializeOwned>(path: &Path) -> SearchResult<T> {
    let data = fs::read(path).map_err(|e| SearchError::from_io(e, path))?;
    Ok(serde_json::from_slice(&data)?)
}

/// Serializes `value` as pretty JSON to `path`, replacing any previous content.
pub fn export_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> SearchResult<()> {
    let data = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &data)
}

fn write_atomic(path: &Path, data: &[u8]) -> SearchResult<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    mkdir(parent)?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(data)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| SearchError::IoError(e.error))?;
    Ok(())
}
