use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::engine::SearchType;

/// One accepted structural hit, as persisted in a per-job match index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    /// Reference database identifier of the matched entry
    pub identifier: String,
    /// Id of the query job that produced the match
    pub target_id: String,
    pub target_path: PathBuf,
    /// Chemical component definition sitting next to the query, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_cc_path: Option<PathBuf>,
    pub match_type: SearchType,
    /// 1-based component number for multi-component hits
    pub match_number: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chemical_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity_score: Option<f64>,
    #[serde(
        default,
        rename = "match_atoms",
        skip_serializing_if = "Option::is_none"
    )]
    pub matched_atom_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r_factor: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radiation_source: Option<String>,
    #[serde(default, rename = "doi", skip_serializing_if = "Option::is_none")]
    pub citation_doi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_disorder: Option<bool>,
    #[serde(
        default,
        rename = "mol2_file_path",
        skip_serializing_if = "Option::is_none"
    )]
    pub mol2_path: Option<PathBuf>,
    #[serde(
        default,
        rename = "mol_file_path",
        skip_serializing_if = "Option::is_none"
    )]
    pub mol_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine_directory: Option<PathBuf>,
}

/// A chemical component row of the corpus-wide component index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentRow {
    pub cc_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inchikey: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smiles: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stereo_smiles: Option<String>,
}

/// A protomer/tautomer variant row of the corpus-wide variant index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantRow {
    /// Parent chemical component id
    pub cc_id: String,
    pub cc_variant_id: String,
    /// 1-based protomer number
    pub protomer_index: u32,
    /// 1-based tautomer number
    pub tautomer_index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inchikey: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smiles: Option<String>,
}

/// Row of a path index: grouped by parent id, ordered by a derived sort key
pub trait PathRow: Clone {
    /// Parent identifier used as the grouping key
    fn cc_id(&self) -> &str;

    /// Identifier used for derived file names and filter-list matching
    fn entry_id(&self) -> &str;

    /// Key ordering rows within one parent group
    fn sort_key(&self) -> String;
}

impl PathRow for ComponentRow {
    fn cc_id(&self) -> &str {
        &self.cc_id
    }

    fn entry_id(&self) -> &str {
        &self.cc_id
    }

    fn sort_key(&self) -> String {
        self.cc_id.clone()
    }
}

impl PathRow for VariantRow {
    fn cc_id(&self) -> &str {
        &self.cc_id
    }

    fn entry_id(&self) -> &str {
        &self.cc_variant_id
    }

    /// Protomer then tautomer, three digits each, so "010" sorts after "002"
    fn sort_key(&self) -> String {
        format!("{:03}{:03}", self.protomer_index, self.tautomer_index)
    }
}
