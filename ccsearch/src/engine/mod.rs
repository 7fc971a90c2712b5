//! The search engine seam.
//!
//! The structure matcher itself is external. The orchestrator only needs
//! `search(query, settings) -> ordered hits`. Engines are assumed to be
//! non-reentrant: every method takes `&mut self`, and an engine instance is
//! owned by exactly one worker for the lifetime of a chunk.
mod catalog;

pub use catalog::CatalogEngine;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::errors::{SearchError, SearchResult};
use crate::job::Job;

/// Kind of structural search to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    Similarity,
    Substructure,
}

impl SearchType {
    pub fn as_str(self) -> &'static str {
        match self {
            SearchType::Similarity => "similarity",
            SearchType::Substructure => "substructure",
        }
    }
}

impl fmt::Display for SearchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchType {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "similarity" => Ok(SearchType::Similarity),
            "substructure" => Ok(SearchType::Substructure),
            other => Err(SearchError::config_error(format!(
                "Unknown search type '{}' (expected similarity|substructure)",
                other
            ))),
        }
    }
}

/// Settings handed to the engine on every call.
///
/// Validate with [`EngineSettings::validate`] before the first search; the
/// worker constructors do this for you.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    #[serde(default = "default_search_type")]
    pub search_type: SearchType,

    /// Minimum similarity score in (0, 1] for a similarity hit
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,

    /// Upper bound on the crystallographic R factor, in percent
    #[serde(default = "default_max_r_factor")]
    pub max_r_factor_percent: f64,

    /// Restrict to organic structures without metals
    #[serde(default)]
    pub suppress_metals: bool,

    #[serde(default = "default_true")]
    pub require_3d_coordinates: bool,

    #[serde(default = "default_true")]
    pub exclude_disorder: bool,

    #[serde(default = "default_max_hits_per_structure")]
    pub max_hits_per_structure: usize,

    /// Hits past this count are reported but not materialized
    #[serde(default = "default_max_hits")]
    pub max_hits: usize,
}

fn default_search_type() -> SearchType {
    SearchType::Similarity
}

fn default_similarity_threshold() -> f64 {
    0.95
}

fn default_max_r_factor() -> f64 {
    10.0
}

fn default_true() -> bool {
    true
}

fn default_max_hits_per_structure() -> usize {
    1
}

fn default_max_hits() -> usize {
    50
}

impl EngineSettings {
    /// Default settings for `search_type`
    pub fn new(search_type: SearchType) -> Self {
        Self {
            search_type,
            similarity_threshold: default_similarity_threshold(),
            max_r_factor_percent: default_max_r_factor(),
            suppress_metals: false,
            require_3d_coordinates: true,
            exclude_disorder: true,
            max_hits_per_structure: default_max_hits_per_structure(),
            max_hits: default_max_hits(),
        }
    }

    pub fn validate(&self) -> SearchResult<()> {
        if !(self.similarity_threshold > 0.0 && self.similarity_threshold <= 1.0) {
            return Err(SearchError::config_error(format!(
                "similarity_threshold must be in (0, 1], got {}",
                self.similarity_threshold
            )));
        }
        if !(self.max_r_factor_percent > 0.0) {
            return Err(SearchError::config_error(format!(
                "max_r_factor_percent must be positive, got {}",
                self.max_r_factor_percent
            )));
        }
        if self.max_hits_per_structure == 0 {
            return Err(SearchError::config_error(
                "max_hits_per_structure must be at least 1",
            ));
        }
        if self.max_hits == 0 {
            return Err(SearchError::config_error("max_hits must be at least 1"));
        }
        Ok(())
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::new(SearchType::Similarity)
    }
}

/// Metadata of the reference entry behind a hit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    #[serde(default)]
    pub chemical_name: Option<String>,
    #[serde(default)]
    pub r_factor: Option<f64>,
    #[serde(default)]
    pub temperature: Option<String>,
    #[serde(default)]
    pub radiation_source: Option<String>,
    #[serde(default)]
    pub doi: Option<String>,
    #[serde(default)]
    pub has_disorder: Option<bool>,
}

/// One matched component of a hit, already rendered in both artifact formats
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchComponent {
    pub mol2: String,
    pub sdf: String,
}

/// One structural match returned by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    pub identifier: String,
    #[serde(default)]
    pub similarity: Option<f64>,
    /// Number of query atoms matched, for substructure hits
    #[serde(default)]
    pub matched_atoms: Option<usize>,
    #[serde(default)]
    pub entry: EntryMetadata,
    #[serde(default)]
    pub components: Vec<MatchComponent>,
}

/// A structure search backend
pub trait SearchEngine {
    /// Searches the reference database for matches of the query molecule.
    fn search(&mut self, query: &Job, settings: &EngineSettings) -> SearchResult<Vec<Hit>>;

    /// Substructure search keyed by a pattern string instead of a molecule.
    fn search_pattern(
        &mut self,
        _pattern: &str,
        _settings: &EngineSettings,
    ) -> SearchResult<Vec<Hit>> {
        Err(SearchError::engine_error(
            "pattern search is not supported by this engine",
        ))
    }

    /// Release of the reference database, recorded with every match
    fn version(&self) -> Option<String> {
        None
    }

    /// Location of the reference database, recorded with every match
    fn directory(&self) -> Option<PathBuf> {
        None
    }
}

/// Builds a fresh engine for each chunk run in-process
pub type EngineFactory = dyn Fn() -> SearchResult<Box<dyn SearchEngine>> + Send + Sync;
