use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

use super::{EngineSettings, Hit, SearchEngine, SearchType};
use crate::errors::{SearchError, SearchResult};
use crate::job::Job;
use crate::storage;

const VERSION_FILE: &str = "VERSION";
const PATTERN_FILE: &str = "patterns.json";

/// Engine answering queries from a directory of pre-computed hit lists.
///
/// Layout of the engine home:
/// - `<query id>.json`: JSON array of [`Hit`] for that query
/// - `patterns.json`: object mapping a pattern string to its hit array
/// - `VERSION`: optional release label recorded with every match
///
/// A query without a catalog entry has no hits. The engine applies the
/// result filters from [`EngineSettings`] to the stored hits.
#[derive(Debug, Clone)]
pub struct CatalogEngine {
    home: PathBuf,
}

impl CatalogEngine {
    pub fn new(home: impl Into<PathBuf>) -> SearchResult<Self> {
        let home = home.into();
        if !home.is_dir() {
            return Err(SearchError::engine_error(format!(
                "engine home {} is not a directory",
                home.display()
            )));
        }
        Ok(Self { home })
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    fn read_hits(&self, path: &Path) -> SearchResult<Vec<Hit>> {
        storage::import_json(path).map_err(|e| {
            SearchError::engine_error(format!("bad catalog entry {}: {}", path.display(), e))
        })
    }
}

/// Drops hits the settings exclude and caps the per-structure count.
fn apply_settings(hits: Vec<Hit>, settings: &EngineSettings) -> Vec<Hit> {
    let mut per_structure: HashMap<String, usize> = HashMap::new();
    hits.into_iter()
        .filter(|hit| match (settings.search_type, hit.similarity) {
            (SearchType::Similarity, Some(score)) => score >= settings.similarity_threshold,
            _ => true,
        })
        .filter(|hit| {
            hit.entry
                .r_factor
                .map_or(true, |r| r <= settings.max_r_factor_percent)
        })
        .filter(|hit| !(settings.exclude_disorder && hit.entry.has_disorder == Some(true)))
        .filter(|hit| {
            let seen = per_structure.entry(hit.identifier.clone()).or_insert(0);
            *seen += 1;
            *seen <= settings.max_hits_per_structure
        })
        .collect()
}

impl SearchEngine for CatalogEngine {
    fn search(&mut self, query: &Job, settings: &EngineSettings) -> SearchResult<Vec<Hit>> {
        if !query.source_path.is_file() {
            return Err(SearchError::engine_error(format!(
                "cannot read query {}",
                query.source_path.display()
            )));
        }

        let entry = self.home.join(format!("{}.json", query.id));
        if !storage::exists(&entry) {
            trace!("No catalog entry for {}", query.id);
            return Ok(Vec::new());
        }

        let hits = apply_settings(self.read_hits(&entry)?, settings);
        debug!(
            "{} search for {} returned {} hits",
            settings.search_type,
            query.id,
            hits.len()
        );
        Ok(hits)
    }

    fn search_pattern(&mut self, pattern: &str, settings: &EngineSettings) -> SearchResult<Vec<Hit>> {
        let path = self.home.join(PATTERN_FILE);
        if !storage::exists(&path) {
            return Ok(Vec::new());
        }
        let mut table: HashMap<String, Vec<Hit>> = storage::import_json(&path).map_err(|e| {
            SearchError::engine_error(format!("bad pattern catalog {}: {}", path.display(), e))
        })?;
        let hits = table.remove(pattern).unwrap_or_default();
        Ok(apply_settings(hits, settings))
    }

    fn version(&self) -> Option<String> {
        fs::read_to_string(self.home.join(VERSION_FILE))
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn directory(&self) -> Option<PathBuf> {
        Some(self.home.clone())
    }
}
