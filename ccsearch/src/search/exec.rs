use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::worker::Worker;
use crate::errors::{SearchError, SearchResult};
use crate::job::{Chunk, Job};
use crate::results::WorkerResult;
use crate::storage::{self, Format};
use crate::stop::RunContext;

/// The list files a single-job-list search leaves behind.
///
/// The hit list holds the query paths that matched. Two siblings next to it,
/// `<stem>.nomatch.list` and `<stem>.fail.list`, carry the other outcomes so
/// that a parent process can tell "no match" apart from "failed".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutputs {
    pub hit_list: PathBuf,
    pub no_match_list: PathBuf,
    pub fail_list: PathBuf,
}

impl ExecOutputs {
    pub fn for_hit_list(hit_list: impl Into<PathBuf>) -> Self {
        let hit_list = hit_list.into();
        let dir = hit_list.parent().map(Path::to_path_buf).unwrap_or_default();
        let stem = hit_list
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ext = Format::List.extension();
        Self {
            no_match_list: dir.join(format!("{}.nomatch.{}", stem, ext)),
            fail_list: dir.join(format!("{}.fail.{}", stem, ext)),
            hit_list,
        }
    }

    /// Writes all three lists, replacing earlier content.
    pub fn export(&self, result: &WorkerResult) -> SearchResult<()> {
        storage::export_list(&self.hit_list, &result.result_list)?;
        storage::export_list(&self.no_match_list, &paths(&result.no_match_list))?;
        storage::export_list(&self.fail_list, &paths(&result.fail_list))?;
        Ok(())
    }

    /// Deletes lists left over from an earlier invocation.
    pub fn remove_stale(&self) -> SearchResult<()> {
        for path in [&self.hit_list, &self.no_match_list, &self.fail_list] {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(SearchError::from_io(e, path)),
            }
        }
        Ok(())
    }

    /// Rebuilds the outcome of `jobs` from the lists on disk.
    ///
    /// The hit list must exist; the siblings are optional. Entries may name a
    /// job by path or by id. Jobs found in no list are left out, as if a stop
    /// had been requested before they were reached.
    pub fn collect(&self, jobs: &[Job]) -> SearchResult<WorkerResult> {
        if !storage::exists(&self.hit_list) {
            return Err(SearchError::file_not_found(&self.hit_list));
        }
        let hits = lookup(storage::import_list(&self.hit_list)?);
        let no_match = lookup(read_optional(&self.no_match_list)?);
        let failed = lookup(read_optional(&self.fail_list)?);

        let mut result = WorkerResult::new();
        let mut unaccounted = 0;
        for job in jobs {
            if listed(&hits, job) {
                result.push_success(job.clone(), job.path_string());
            } else if listed(&failed, job) {
                result.push_failure(job.clone());
            } else if listed(&no_match, job) {
                result.push_no_match(job.clone());
            } else {
                unaccounted += 1;
            }
        }
        if unaccounted > 0 {
            warn!(
                "{} of {} jobs missing from {}",
                unaccounted,
                jobs.len(),
                self.hit_list.display()
            );
            result.stopped = true;
        }
        Ok(result)
    }
}

fn paths(jobs: &[Job]) -> Vec<String> {
    jobs.iter().map(Job::path_string).collect()
}

fn read_optional(path: &Path) -> SearchResult<Vec<String>> {
    if storage::exists(path) {
        storage::import_list(path)
    } else {
        Ok(Vec::new())
    }
}

fn lookup(entries: Vec<String>) -> HashSet<String> {
    entries.into_iter().collect()
}

fn listed(set: &HashSet<String>, job: &Job) -> bool {
    set.contains(&job.path_string()) || set.contains(&job.id)
}

/// Runs one job list to completion in the current process.
///
/// This is the body of the isolated search command. When `hit_list_path` is
/// given the outcome lists are exported next to it for the parent to collect.
pub fn exec_job_list(
    worker: &mut Worker,
    jobs: Vec<Job>,
    ctx: &RunContext,
    hit_list_path: Option<&Path>,
) -> SearchResult<WorkerResult> {
    storage::mkdir(ctx.result_dir())?;
    let chunk = Chunk { index: 0, jobs };
    let result = worker.run(&chunk, ctx);
    info!(
        "Job list done: {} matched, {} no match, {} failed of {}",
        result.success_list.len(),
        result.no_match_list.len(),
        result.fail_list.len(),
        chunk.len()
    );

    if let Some(path) = hit_list_path {
        ExecOutputs::for_hit_list(path).export(&result)?;
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{CatalogEngine, EngineSettings, SearchType};
    use tempfile::tempdir;

    fn job(id: &str) -> Job {
        Job::from_path(format!("/q/{}.mol2", id))
    }

    #[test]
    fn test_sibling_names() {
        let outputs = ExecOutputs::for_hit_list("/r/chunk-0001/hitList.list");
        assert_eq!(
            outputs.no_match_list,
            PathBuf::from("/r/chunk-0001/hitList.nomatch.list")
        );
        assert_eq!(
            outputs.fail_list,
            PathBuf::from("/r/chunk-0001/hitList.fail.list")
        );
    }

    #[test]
    fn test_export_then_collect() {
        let dir = tempdir().unwrap();
        let outputs = ExecOutputs::for_hit_list(dir.path().join("hitList.list"));

        let mut result = WorkerResult::new();
        result.push_success(job("A"), job("A").path_string());
        result.push_no_match(job("B"));
        result.push_failure(job("C"));
        outputs.export(&result).unwrap();

        let jobs = vec![job("A"), job("B"), job("C")];
        let collected = outputs.collect(&jobs).unwrap();
        assert_eq!(collected.success_list, vec![job("A")]);
        assert_eq!(collected.no_match_list, vec![job("B")]);
        assert_eq!(collected.fail_list, vec![job("C")]);
        assert!(!collected.stopped);
    }

    #[test]
    fn test_collect_with_hit_list_only() {
        let dir = tempdir().unwrap();
        let outputs = ExecOutputs::for_hit_list(dir.path().join("hitList.list"));
        fs::write(&outputs.hit_list, "B\n").unwrap();

        let collected = outputs.collect(&[job("A"), job("B")]).unwrap();
        assert_eq!(collected.success_list, vec![job("B")]);
        assert_eq!(collected.processed(), 1);
        assert!(collected.stopped);
    }

    #[test]
    fn test_collect_requires_hit_list() {
        let dir = tempdir().unwrap();
        let outputs = ExecOutputs::for_hit_list(dir.path().join("hitList.list"));
        assert!(matches!(
            outputs.collect(&[job("A")]),
            Err(SearchError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_remove_stale() {
        let dir = tempdir().unwrap();
        let outputs = ExecOutputs::for_hit_list(dir.path().join("hitList.list"));
        fs::write(&outputs.hit_list, "old\n").unwrap();
        outputs.remove_stale().unwrap();
        assert!(!outputs.hit_list.exists());
        outputs.remove_stale().unwrap();
    }

    #[test]
    fn test_exec_job_list_exports_outcomes() {
        let dir = tempdir().unwrap();
        let home = dir.path().join("home");
        let queries = dir.path().join("queries");
        fs::create_dir_all(&home).unwrap();
        fs::create_dir_all(&queries).unwrap();
        fs::write(queries.join("ATP.mol2"), "").unwrap();
        fs::write(queries.join("GTP.mol2"), "").unwrap();
        fs::write(
            home.join("ATP.json"),
            r#"[{"identifier": "ABEBUF", "similarity": 0.98}]"#,
        )
        .unwrap();

        let engine = CatalogEngine::new(&home).unwrap();
        let mut worker =
            Worker::new(Box::new(engine), EngineSettings::new(SearchType::Similarity)).unwrap();
        let results = dir.path().join("results");
        let ctx = RunContext::new(&results);
        let hit_list = dir.path().join("out").join("hitList.list");

        let jobs = vec![
            Job::from_path(queries.join("ATP.mol2")),
            Job::from_path(queries.join("GTP.mol2")),
            Job::from_path(queries.join("MISSING.mol2")),
        ];
        let result = exec_job_list(&mut worker, jobs, &ctx, Some(&hit_list)).unwrap();
        assert_eq!(result.success_list.len(), 1);
        assert_eq!(result.no_match_list.len(), 1);
        assert_eq!(result.fail_list.len(), 1);

        let hits = storage::import_list(&hit_list).unwrap();
        assert_eq!(hits, vec![queries.join("ATP.mol2").display().to_string()]);
        let outputs = ExecOutputs::for_hit_list(&hit_list);
        assert_eq!(storage::import_list(&outputs.fail_list).unwrap().len(), 1);
        assert!(results.join("ATP").join("ATP-index.json").exists());
    }
}
