use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use super::materialize::{HitWriter, QueryRef};
use super::ChunkRunner;
use crate::engine::{EngineFactory, EngineSettings, SearchEngine, SearchType};
use crate::errors::SearchResult;
use crate::index::{MatchIndex, MatchRecord};
use crate::job::{Chunk, Job};
use crate::results::{JobOutcome, WorkerResult};
use crate::stop::RunContext;

/// Runs jobs sequentially against one exclusively owned engine
pub struct Worker {
    engine: Box<dyn SearchEngine>,
    settings: EngineSettings,
    engine_version: Option<String>,
    engine_directory: Option<PathBuf>,
}

impl Worker {
    /// Takes ownership of `engine`. Fails if `settings` do not validate.
    pub fn new(engine: Box<dyn SearchEngine>, settings: EngineSettings) -> SearchResult<Self> {
        settings.validate()?;
        let engine_version = engine.version();
        let engine_directory = engine.directory();
        debug!(
            "Worker ready: {} search, engine version {:?}",
            settings.search_type, engine_version
        );
        Ok(Self {
            engine,
            settings,
            engine_version,
            engine_directory,
        })
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    fn writer<'a>(&self, result_dir: &'a Path, settings: &'a EngineSettings) -> HitWriter<'a> {
        HitWriter {
            result_dir,
            settings,
            engine_version: self.engine_version.clone(),
            engine_directory: self.engine_directory.clone(),
        }
    }

    /// Searches one query file and indexes every accepted hit under
    /// `result_dir/<job id>/`.
    pub fn search_job(&mut self, job: &Job, result_dir: &Path) -> JobOutcome {
        let hits = match self.engine.search(job, &self.settings) {
            Ok(hits) => hits,
            Err(e) => {
                error!("Search failed for {} ({}): {}", job.id, job.source_path.display(), e);
                return JobOutcome::Failed(e.to_string());
            }
        };
        debug!("{} hit count {}", job.id, hits.len());
        if hits.is_empty() {
            return JobOutcome::NoMatch;
        }

        let query = QueryRef {
            id: &job.id,
            path: Some(&job.source_path),
        };
        let write_components = self.settings.search_type == SearchType::Substructure;
        let records = self.writer(result_dir, &self.settings).materialize(
            query,
            &hits,
            self.settings.search_type,
            write_components,
        );
        self.index_outcome(&job.id, result_dir, hits.len(), records)
    }

    /// Substructure search keyed by a pattern string. Every component of each
    /// hit is materialized and indexed under `result_dir/<query_id>/`.
    pub fn search_pattern(&mut self, query_id: &str, pattern: &str, result_dir: &Path) -> JobOutcome {
        let hits = match self.engine.search_pattern(pattern, &self.settings) {
            Ok(hits) => hits,
            Err(e) => {
                error!("Pattern search failed for {} ({}): {}", query_id, pattern, e);
                return JobOutcome::Failed(e.to_string());
            }
        };
        info!("{} pattern hit count {}", query_id, hits.len());
        if hits.is_empty() {
            return JobOutcome::NoMatch;
        }

        let query = QueryRef {
            id: query_id,
            path: None,
        };
        let records = self
            .writer(result_dir, &self.settings)
            .materialize(query, &hits, SearchType::Substructure, true);
        self.index_outcome(query_id, result_dir, hits.len(), records)
    }

    fn index_outcome(
        &self,
        query_id: &str,
        result_dir: &Path,
        hits: usize,
        records: SearchResult<Vec<MatchRecord>>,
    ) -> JobOutcome {
        let records = match records {
            Ok(records) => records,
            Err(e) => {
                error!("Failed writing match artifacts for {}: {}", query_id, e);
                return JobOutcome::Failed(e.to_string());
            }
        };

        let count = records.len();
        let mut index = MatchIndex::new(MatchIndex::job_index_path(result_dir, query_id));
        index.load(records);
        if !index.write_index() {
            return JobOutcome::Failed(format!(
                "cannot write match index {}",
                index.path().display()
            ));
        }
        JobOutcome::Matched {
            hits,
            records: count,
        }
    }

    /// Processes `chunk` in order, polling for a stop request before each job.
    ///
    /// A stop is not a failure: the jobs not yet reached are left out of every
    /// list and the result is flagged as stopped.
    pub fn run(&mut self, chunk: &Chunk, ctx: &RunContext) -> WorkerResult {
        let mut result = WorkerResult::new();
        let total = chunk.len();

        for (i, job) in chunk.jobs.iter().enumerate() {
            if ctx.is_cancelled() {
                info!(
                    "Stop requested, {} leaving after {} of {} jobs",
                    chunk.name(),
                    i,
                    total
                );
                result.stopped = true;
                break;
            }
            info!("({} of {}) searching {}", i + 1, total, job.id);

            match self.search_job(job, ctx.result_dir()) {
                JobOutcome::Matched { hits, records } => {
                    debug!("{} matched with {} hits, {} records", job.id, hits, records);
                    ctx.metrics().record_match(records);
                    result.push_success(job.clone(), job.path_string());
                }
                JobOutcome::NoMatch => {
                    ctx.metrics().record_no_match();
                    result.push_no_match(job.clone());
                }
                JobOutcome::Failed(reason) => {
                    warn!("{} failed: {}", job.id, reason);
                    ctx.metrics().record_failure(1);
                    result.push_failure(job.clone());
                }
            }
        }
        result
    }
}

/// Runs each chunk on the calling thread with an engine built just for it.
///
/// Only one chunk runs at a time; a pool sized larger is clamped.
pub struct InProcessRunner {
    factory: Arc<EngineFactory>,
    settings: EngineSettings,
}

impl InProcessRunner {
    pub fn new(factory: Arc<EngineFactory>, settings: EngineSettings) -> SearchResult<Self> {
        settings.validate()?;
        Ok(Self { factory, settings })
    }
}

impl ChunkRunner for InProcessRunner {
    fn run_chunk(&self, chunk: &Chunk, ctx: &RunContext) -> WorkerResult {
        let start = Instant::now();
        info!("Starting {} with {} jobs", chunk.name(), chunk.len());

        let worker = (self.factory)().and_then(|engine| Worker::new(engine, self.settings.clone()));
        let mut worker = match worker {
            Ok(worker) => worker,
            Err(e) => {
                error!("Cannot start engine for {}: {}", chunk.name(), e);
                ctx.metrics().record_failure(chunk.len());
                return WorkerResult::failed(&chunk.jobs);
            }
        };

        let result = worker.run(chunk, ctx);
        info!(
            "Completed {} ({} matched, {} no match, {} failed) in {}",
            chunk.name(),
            result.success_list.len(),
            result.no_match_list.len(),
            result.fail_list.len(),
            humantime::format_duration(start.elapsed())
        );
        result
    }

    fn max_concurrent_chunks(&self) -> Option<NonZeroUsize> {
        Some(NonZeroUsize::MIN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EntryMetadata, Hit, MatchComponent};
    use crate::errors::SearchError;
    use crate::stop::StopSignal;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    /// Answers from a fixed table; ids starting with `ERR` raise an engine error.
    struct TableEngine {
        hits: HashMap<String, usize>,
    }

    impl SearchEngine for TableEngine {
        fn search(&mut self, query: &Job, _settings: &EngineSettings) -> SearchResult<Vec<Hit>> {
            if query.id.starts_with("ERR") {
                return Err(SearchError::engine_error("malformed molecule"));
            }
            let n = self.hits.get(&query.id).copied().unwrap_or(0);
            Ok((0..n)
                .map(|i| Hit {
                    identifier: format!("REF{}", i),
                    similarity: Some(0.99),
                    matched_atoms: Some(6),
                    entry: EntryMetadata::default(),
                    components: vec![MatchComponent {
                        mol2: "mol2".to_string(),
                        sdf: "sdf".to_string(),
                    }],
                })
                .collect())
        }

        fn search_pattern(&mut self, pattern: &str, _settings: &EngineSettings) -> SearchResult<Vec<Hit>> {
            Ok(vec![Hit {
                identifier: format!("P-{}", pattern.len()),
                similarity: None,
                matched_atoms: Some(3),
                entry: EntryMetadata::default(),
                components: vec![MatchComponent::default(), MatchComponent::default()],
            }])
        }

        fn version(&self) -> Option<String> {
            Some("test-1".to_string())
        }
    }

    fn worker(table: &[(&str, usize)], search_type: SearchType) -> Worker {
        let engine = TableEngine {
            hits: table.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        };
        Worker::new(Box::new(engine), EngineSettings::new(search_type)).unwrap()
    }

    fn chunk(ids: &[&str]) -> Chunk {
        Chunk {
            index: 0,
            jobs: ids
                .iter()
                .map(|id| Job::from_path(format!("/q/{}.mol2", id)))
                .collect(),
        }
    }

    /// Reports a stop once `after` polls have happened.
    struct StopAfter {
        after: usize,
        polls: AtomicUsize,
    }

    impl StopSignal for StopAfter {
        fn should_stop(&self) -> bool {
            self.polls.fetch_add(1, Ordering::SeqCst) >= self.after
        }
    }

    #[test]
    fn test_three_way_outcomes() {
        let dir = tempdir().unwrap();
        let ctx = RunContext::new(dir.path());
        let mut worker = worker(&[("A", 2), ("B", 0)], SearchType::Similarity);

        let result = worker.run(&chunk(&["A", "B", "ERR1"]), &ctx);
        assert_eq!(result.success_list.len(), 1);
        assert_eq!(result.result_list, vec!["/q/A.mol2".to_string()]);
        assert_eq!(result.no_match_list[0].id, "B");
        assert_eq!(result.fail_list[0].id, "ERR1");
        assert!(!result.stopped);

        let stats = ctx.metrics().get_stats();
        assert_eq!(stats.jobs_matched, 1);
        assert_eq!(stats.records_written, 2);
        assert_eq!(stats.jobs_without_match, 1);
        assert_eq!(stats.jobs_failed, 1);
    }

    #[test]
    fn test_index_written_only_with_hits() {
        let dir = tempdir().unwrap();
        let mut worker = worker(&[("A", 3), ("B", 0)], SearchType::Substructure);

        let outcome = worker.search_job(&Job::from_path("/q/A.mol2"), dir.path());
        assert_eq!(outcome, JobOutcome::Matched { hits: 3, records: 3 });
        let index = MatchIndex::for_job(dir.path(), "A");
        assert_eq!(index.len(), 3);
        assert_eq!(index.get(0).and_then(|r| r.engine_version.as_deref()), Some("test-1"));

        let outcome = worker.search_job(&Job::from_path("/q/B.mol2"), dir.path());
        assert_eq!(outcome, JobOutcome::NoMatch);
        assert!(!MatchIndex::job_index_path(dir.path(), "B").exists());
    }

    #[test]
    fn test_repeated_search_rewrites_index() {
        let dir = tempdir().unwrap();
        let mut worker = worker(&[("A", 2)], SearchType::Similarity);
        let job = Job::from_path("/q/A.mol2");
        worker.search_job(&job, dir.path());
        worker.search_job(&job, dir.path());
        assert_eq!(MatchIndex::for_job(dir.path(), "A").len(), 2);
    }

    #[test]
    fn test_stop_at_job_boundary() {
        let dir = tempdir().unwrap();
        let stop = Arc::new(StopAfter {
            after: 3,
            polls: AtomicUsize::new(0),
        });
        let ctx = RunContext::with_stop(dir.path(), stop);
        let mut worker = worker(
            &[("J0", 1), ("J1", 1), ("J2", 1), ("J3", 1), ("J4", 1)],
            SearchType::Similarity,
        );

        let result = worker.run(&chunk(&["J0", "J1", "J2", "J3", "J4"]), &ctx);
        let ids: Vec<&str> = result.success_list.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["J0", "J1", "J2"]);
        assert!(result.stopped);
        assert!(result.fail_list.is_empty());
        assert!(!MatchIndex::job_index_path(dir.path(), "J3").exists());
    }

    #[test]
    fn test_pattern_search_materializes_components() {
        let dir = tempdir().unwrap();
        let mut worker = worker(&[], SearchType::Similarity);
        let outcome = worker.search_pattern("ring", "c1ccccc1", dir.path());
        assert_eq!(outcome, JobOutcome::Matched { hits: 1, records: 2 });

        let index = MatchIndex::for_job(dir.path(), "ring");
        assert_eq!(index.len(), 2);
        assert!(index.forward().all(|r| r.match_type == SearchType::Substructure));
        assert!(dir.path().join("ring").join("ring_P-8_002.sdf").exists());
    }

    #[test]
    fn test_runner_fails_chunk_when_engine_unavailable() {
        let dir = tempdir().unwrap();
        let factory: Arc<EngineFactory> = Arc::new(|| -> SearchResult<Box<dyn SearchEngine>> {
            Err(SearchError::engine_error("license not found"))
        });
        let runner = InProcessRunner::new(factory, EngineSettings::default()).unwrap();
        let ctx = RunContext::new(dir.path());

        let result = runner.run_chunk(&chunk(&["A", "B"]), &ctx);
        assert_eq!(result.fail_list.len(), 2);
        assert!(result.success_list.is_empty());
        assert_eq!(ctx.metrics().get_stats().jobs_failed, 2);
    }
}
