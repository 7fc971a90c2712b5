use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

use crate::engine::{EngineSettings, Hit, SearchType};
use crate::errors::{SearchError, SearchResult};
use crate::index::MatchRecord;
use crate::storage;

/// Where and how accepted hits of one query are written out
#[derive(Debug, Clone)]
pub struct HitWriter<'a> {
    pub result_dir: &'a Path,
    pub settings: &'a EngineSettings,
    pub engine_version: Option<String>,
    pub engine_directory: Option<PathBuf>,
}

/// Identity of the query a batch of hits belongs to
#[derive(Debug, Clone, Copy)]
pub struct QueryRef<'a> {
    pub id: &'a str,
    /// Query molecule file; `None` for pattern searches
    pub path: Option<&'a Path>,
}

impl<'a> HitWriter<'a> {
    /// Directory receiving artifacts and the match index of `query_id`
    pub fn job_dir(&self, query_id: &str) -> PathBuf {
        self.result_dir.join(query_id)
    }

    /// Turns the first `max_hits` hits into match records, writing one
    /// `.mol2`/`.sdf` pair per matched component.
    ///
    /// With `write_components` every component becomes its own record with a
    /// 1-based `match_number`; otherwise each hit yields one record numbered 1.
    pub fn materialize(
        &self,
        query: QueryRef<'_>,
        hits: &[Hit],
        match_type: SearchType,
        write_components: bool,
    ) -> SearchResult<Vec<MatchRecord>> {
        let dir = self.job_dir(query.id);
        let target_cc_path = query
            .path
            .and_then(Path::parent)
            .map(|p| p.join(format!("{}.cif", query.id)))
            .filter(|p| storage::exists(p));

        let mut records = Vec::new();
        for hit in hits.iter().take(self.settings.max_hits) {
            let base = self.base_record(query, target_cc_path.clone(), hit, match_type);
            storage::mkdir(&dir)?;

            if !write_components {
                records.push(MatchRecord {
                    match_number: 1,
                    ..base
                });
                continue;
            }

            for (jj, component) in hit.components.iter().enumerate() {
                let number = jj + 1;
                let stem = format!("{}_{}_{:03}", query.id, hit.identifier, number);
                let mol2_path = dir.join(format!("{}.mol2", stem));
                let mol_path = dir.join(format!("{}.sdf", stem));
                write_artifact(&mol2_path, &component.mol2)?;
                write_artifact(&mol_path, &component.sdf)?;
                trace!("({}) adding component {}", number, mol2_path.display());

                records.push(MatchRecord {
                    match_number: number,
                    mol2_path: Some(mol2_path),
                    mol_path: Some(mol_path),
                    ..base.clone()
                });
            }
        }

        debug!(
            "Materialized {} records for {} from {} hits",
            records.len(),
            query.id,
            hits.len()
        );
        Ok(records)
    }

    fn base_record(
        &self,
        query: QueryRef<'_>,
        target_cc_path: Option<PathBuf>,
        hit: &Hit,
        match_type: SearchType,
    ) -> MatchRecord {
        let entry = &hit.entry;
        MatchRecord {
            identifier: hit.identifier.clone(),
            target_id: query.id.to_string(),
            target_path: query.path.map(Path::to_path_buf).unwrap_or_default(),
            target_cc_path,
            match_type,
            match_number: 1,
            chemical_name: entry.chemical_name.clone(),
            similarity_score: match match_type {
                SearchType::Similarity => hit.similarity,
                SearchType::Substructure => None,
            },
            matched_atom_count: match match_type {
                SearchType::Similarity => None,
                SearchType::Substructure => hit.matched_atoms,
            },
            r_factor: entry.r_factor,
            temperature: entry.temperature.clone(),
            radiation_source: entry.radiation_source.clone(),
            citation_doi: entry.doi.clone(),
            has_disorder: entry.has_disorder,
            mol2_path: None,
            mol_path: None,
            engine_version: self.engine_version.clone(),
            engine_directory: self.engine_directory.clone(),
        }
    }
}

fn write_artifact(path: &Path, contents: &str) -> SearchResult<()> {
    fs::write(path, contents).map_err(|e| SearchError::from_io(e, path))
}
