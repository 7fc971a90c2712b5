//! Append-only record indexes persisted as a single JSON document.
//!
//! An index keeps its rows in insertion order. Writing always replaces the
//! whole file with the current working set, and reading appends the file's
//! rows to it. There is no partial append on disk.
mod path_index;
mod record;

pub use path_index::{
    ComponentIndex, DepictionItem, PathEntry, PathIndex, PriorityList, VariantIndex,
};
pub use record::{ComponentRow, MatchRecord, PathRow, VariantRow};

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

use crate::storage;

/// Suffix of the per-job match index file name
pub const MATCH_INDEX_SUFFIX: &str = "-index.json";

/// Ordered collection of rows backed by one JSON file
#[derive(Debug, Clone)]
pub struct IndexStore<T> {
    path: PathBuf,
    rows: Vec<T>,
}

/// Per-job index of structural matches
pub type MatchIndex = IndexStore<MatchRecord>;

impl<T> IndexStore<T>
where
    T: Serialize + DeserializeOwned + Debug,
{
    /// Creates an empty index backed by `path` without touching the disk.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            rows: Vec::new(),
        }
    }

    /// Creates an index and reads any rows already stored at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let mut index = Self::new(path);
        index.read_index();
        index
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `rows` to the working set. Nothing is persisted until
    /// [`IndexStore::write_index`].
    pub fn load(&mut self, rows: impl IntoIterator<Item = T>) {
        self.rows.extend(rows);
    }

    /// Replaces the backing file with the full working set.
    pub fn write_index(&self) -> bool {
        match storage::export_json(&self.path, &self.rows) {
            Ok(()) => {
                debug!("Wrote {} rows to {}", self.rows.len(), self.path.display());
                true
            }
            Err(e) => {
                error!("Failed writing index {}: {}", self.path.display(), e);
                false
            }
        }
    }

    /// Appends the rows stored in the backing file to the working set.
    ///
    /// A missing file is not an error and leaves the working set unchanged.
    pub fn read_index(&mut self) -> bool {
        if !storage::exists(&self.path) {
            return true;
        }
        match storage::import_json::<Vec<T>>(&self.path) {
            Ok(rows) => {
                debug!("Read {} rows from {}", rows.len(), self.path.display());
                self.rows.extend(rows);
                true
            }
            Err(e) => {
                error!("Failed reading index {}: {}", self.path.display(), e);
                false
            }
        }
    }

    /// Rows in insertion order
    pub fn forward(&self) -> std::slice::Iter<'_, T> {
        self.rows.iter()
    }

    /// Rows in reverse insertion order
    pub fn reverse(&self) -> std::iter::Rev<std::slice::Iter<'_, T>> {
        self.rows.iter().rev()
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.rows.get(index)
    }

    pub fn rows(&self) -> &[T] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn clear(&mut self) {
        self.rows.clear();
    }

    /// Logs every row at info level.
    pub fn dump(&self) {
        for (i, row) in self.rows.iter().enumerate() {
            info!("{:4}: {:?}", i, row);
        }
        info!("Completed dump of {}", self.path.display());
    }
}

impl<'a, T> IntoIterator for &'a IndexStore<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

impl IndexStore<MatchRecord> {
    /// Location of the match index for `job_id` under `result_dir`
    pub fn job_index_path(result_dir: &Path, job_id: &str) -> PathBuf {
        result_dir
            .join(job_id)
            .join(format!("{}{}", job_id, MATCH_INDEX_SUFFIX))
    }

    /// Opens the match index of one job, reading existing rows if present.
    pub fn for_job(result_dir: &Path, job_id: &str) -> Self {
        Self::open(Self::job_index_path(result_dir, job_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SearchType;
    use std::fs;
    use tempfile::tempdir;

    fn record(i: usize) -> MatchRecord {
        MatchRecord {
            identifier: format!("REF{:04}", i),
            target_id: "ATP".to_string(),
            target_path: PathBuf::from("/q/ATP.mol2"),
            target_cc_path: None,
            match_type: if i % 2 == 0 {
                SearchType::Similarity
            } else {
                SearchType::Substructure
            },
            match_number: 1 + i % 3,
            chemical_name: Some(format!("compound {}", i)),
            similarity_score: if i % 2 == 0 { Some(0.5 + i as f64 / 128.0) } else { None },
            matched_atom_count: if i % 2 == 1 { Some(i) } else { None },
            r_factor: Some(2.5),
            temperature: Some("293".to_string()),
            radiation_source: Some("X-ray".to_string()),
            citation_doi: None,
            has_disorder: Some(false),
            mol2_path: None,
            mol_path: None,
            engine_version: Some("2024.1".to_string()),
            engine_directory: None,
        }
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let dir = tempdir().unwrap();
        for count in [0usize, 1, 50] {
            let path = dir.path().join(format!("idx-{}.json", count));
            let rows: Vec<MatchRecord> = (0..count).map(record).collect();

            let mut index = MatchIndex::new(&path);
            index.load(rows.clone());
            assert!(index.write_index());

            let reread = MatchIndex::open(&path);
            assert_eq!(reread.rows(), rows.as_slice());
        }
    }

    #[test]
    fn test_missing_file_reads_empty() {
        let dir = tempdir().unwrap();
        let mut index = MatchIndex::new(dir.path().join("absent.json"));
        assert!(index.read_index());
        assert!(index.is_empty());
    }

    #[test]
    fn test_corrupt_file_reports_failure() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "[{").unwrap();

        let mut index = MatchIndex::new(&path);
        assert!(!index.read_index());
        assert!(index.is_empty());
    }

    #[test]
    fn test_write_overwrites_previous_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("idx.json");

        let mut first = MatchIndex::new(&path);
        first.load((0..5).map(record));
        assert!(first.write_index());

        let mut second = MatchIndex::new(&path);
        second.load(vec![record(9)]);
        assert!(second.write_index());

        assert_eq!(MatchIndex::open(&path).len(), 1);
    }

    #[test]
    fn test_read_extends_working_set() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("idx.json");
        let mut stored = MatchIndex::new(&path);
        stored.load((0..2).map(record));
        stored.write_index();

        let mut index = MatchIndex::new(&path);
        index.load(vec![record(7)]);
        assert!(index.read_index());
        let ids: Vec<&str> = index.forward().map(|r| r.identifier.as_str()).collect();
        assert_eq!(ids, vec!["REF0007", "REF0000", "REF0001"]);
    }

    #[test]
    fn test_forward_and_reverse_are_restartable() {
        let mut index = MatchIndex::new("unused.json");
        index.load((0..4).map(record));

        let fwd: Vec<&str> = index.forward().map(|r| r.identifier.as_str()).collect();
        let again: Vec<&str> = (&index).into_iter().map(|r| r.identifier.as_str()).collect();
        let rev: Vec<&str> = index.reverse().map(|r| r.identifier.as_str()).collect();

        assert_eq!(fwd, vec!["REF0000", "REF0001", "REF0002", "REF0003"]);
        assert_eq!(fwd, again);
        assert_eq!(rev, vec!["REF0003", "REF0002", "REF0001", "REF0000"]);
        assert_eq!(index.get(2).map(|r| r.match_number), Some(3));
        assert!(index.get(10).is_none());

        index.clear();
        assert_eq!(index.forward().count(), 0);
    }

    #[test]
    fn test_job_index_path() {
        let path = MatchIndex::job_index_path(Path::new("/results"), "ATP");
        assert_eq!(path, PathBuf::from("/results/ATP/ATP-index.json"));
    }
}
