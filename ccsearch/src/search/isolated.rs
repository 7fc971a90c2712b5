use std::ffi::OsString;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::exec::ExecOutputs;
use super::ChunkRunner;
use crate::engine::SearchType;
use crate::errors::{SearchError, SearchResult};
use crate::index::MatchIndex;
use crate::job::{Chunk, Job};
use crate::results::WorkerResult;
use crate::storage;
use crate::stop::RunContext;

/// Request file naming the query paths of one chunk
pub const QUERY_LIST_FILE_NAME: &str = "queryFileList.list";
/// Hit list written by the isolated search command
pub const HIT_LIST_FILE_NAME: &str = "hitList.list";
/// Combined stdout and stderr of the isolated search command
pub const EXEC_LOG_FILE_NAME: &str = "execlog.log";

const DEFAULT_CHUNK_TIMEOUT: Duration = Duration::from_secs(60);
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Program and leading arguments of the single-job-list search command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsolatedCommand {
    program: PathBuf,
    args: Vec<OsString>,
}

impl IsolatedCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Appends a fixed argument placed before the per-chunk options.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// The running executable with its `exec` subcommand
    pub fn current_exe() -> SearchResult<Self> {
        let program = std::env::current_exe().map_err(|e| {
            SearchError::process_error(format!("cannot locate current executable: {}", e))
        })?;
        Ok(Self::new(program).arg("exec"))
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

/// Runs every chunk in a freshly spawned OS process.
///
/// The child receives `--mol-list-path`, `--result-path`, `--search-type`,
/// `--engine-home` and `--hit-list-path` after the command's own arguments,
/// and must exit with status 0 after writing its hit list.
#[derive(Debug, Clone)]
pub struct IsolatedRunner {
    command: IsolatedCommand,
    search_type: SearchType,
    engine_home: PathBuf,
    timeout: Duration,
}

impl IsolatedRunner {
    pub fn new(command: IsolatedCommand, search_type: SearchType, engine_home: PathBuf) -> Self {
        Self {
            command,
            search_type,
            engine_home,
            timeout: DEFAULT_CHUNK_TIMEOUT,
        }
    }

    /// Wall-clock limit for one chunk. Scale it with the chunk size.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn spawn(
        &self,
        request: &Path,
        work_dir: &Path,
        result_dir: &Path,
        outputs: &ExecOutputs,
    ) -> SearchResult<Child> {
        let log_path = work_dir.join(EXEC_LOG_FILE_NAME);
        let log = File::create(&log_path).map_err(|e| SearchError::from_io(e, &log_path))?;
        let log_err = log.try_clone()?;

        let child = Command::new(&self.command.program)
            .args(&self.command.args)
            .arg("--mol-list-path")
            .arg(request)
            .arg("--result-path")
            .arg(result_dir)
            .arg("--search-type")
            .arg(self.search_type.as_str())
            .arg("--engine-home")
            .arg(&self.engine_home)
            .arg("--hit-list-path")
            .arg(&outputs.hit_list)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .spawn()
            .map_err(|e| {
                SearchError::process_error(format!(
                    "cannot launch {}: {}",
                    self.command.program.display(),
                    e
                ))
            })?;
        Ok(child)
    }

    /// Runs the chunk in a child process and returns its exit status, or
    /// `None` when the timeout elapsed and the child was killed.
    fn execute(
        &self,
        chunk: &Chunk,
        ctx: &RunContext,
        outputs: &ExecOutputs,
    ) -> SearchResult<Option<ExitStatus>> {
        let work_dir = ctx.result_dir().join(chunk.name());
        storage::mkdir(&work_dir)?;
        outputs.remove_stale()?;

        let request = work_dir.join(QUERY_LIST_FILE_NAME);
        let paths: Vec<String> = chunk.jobs.iter().map(Job::path_string).collect();
        storage::export_list(&request, &paths)?;

        let mut child = self.spawn(&request, &work_dir, ctx.result_dir(), outputs)?;
        debug!(
            "Launched {} (pid {}) for {}",
            self.command.program.display(),
            child.id(),
            chunk.name()
        );
        Ok(wait_with_timeout(&mut child, self.timeout)?)
    }
}

impl ChunkRunner for IsolatedRunner {
    fn run_chunk(&self, chunk: &Chunk, ctx: &RunContext) -> WorkerResult {
        if ctx.is_cancelled() {
            info!("Stop requested, not launching {}", chunk.name());
            let mut result = WorkerResult::new();
            result.stopped = true;
            return result;
        }

        let start = Instant::now();
        let outputs =
            ExecOutputs::for_hit_list(ctx.result_dir().join(chunk.name()).join(HIT_LIST_FILE_NAME));
        let failed = |reason: String| {
            error!(
                "{} failed after {}: {}",
                chunk.name(),
                humantime::format_duration(start.elapsed()),
                reason
            );
            ctx.metrics().record_failure(chunk.len());
            WorkerResult::failed(&chunk.jobs)
        };

        let status = match self.execute(chunk, ctx, &outputs) {
            Ok(Some(status)) => status,
            Ok(None) => {
                return failed(format!(
                    "timed out after {}",
                    humantime::format_duration(self.timeout)
                ))
            }
            Err(e) => return failed(e.to_string()),
        };
        if !status.success() {
            return failed(format!("search command exited with {}", status));
        }

        let result = match outputs.collect(&chunk.jobs) {
            Ok(result) => result,
            Err(e) => return failed(format!("no usable output: {}", e)),
        };

        for job in &result.success_list {
            let records = MatchIndex::for_job(ctx.result_dir(), &job.id).len();
            ctx.metrics().record_match(records);
        }
        for _ in &result.no_match_list {
            ctx.metrics().record_no_match();
        }
        ctx.metrics().record_failure(result.fail_list.len());

        info!(
            "Completed {} in a child process ({} matched, {} no match, {} failed) in {}",
            chunk.name(),
            result.success_list.len(),
            result.no_match_list.len(),
            result.fail_list.len(),
            humantime::format_duration(start.elapsed())
        );
        result
    }
}

/// Polls `child` until it exits or `timeout` elapses. A child still running at
/// the deadline is killed and reaped.
fn wait_with_timeout(child: &mut Child, timeout: Duration) -> io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(Some(status)),
            Ok(None) => {}
            Err(e) => {
                warn!("Cannot poll child process {}: {}", child.id(), e);
                kill_and_reap(child);
                return Err(e);
            }
        }
        if Instant::now() >= deadline {
            warn!("Killing child process {} at timeout", child.id());
            kill_and_reap(child);
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Kills the child if it still runs and waits for it so no zombie is left.
fn kill_and_reap(child: &mut Child) {
    if let Err(e) = child.kill() {
        warn!("Cannot kill child process {}: {}", child.id(), e);
    }
    if let Err(e) = child.wait() {
        warn!("Cannot reap child process {}: {}", child.id(), e);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn sh(script: &str) -> IsolatedCommand {
        IsolatedCommand::new("/bin/sh").arg("-c").arg(script)
    }

    fn chunk(dir: &Path, ids: &[&str]) -> Chunk {
        Chunk {
            index: 3,
            jobs: ids
                .iter()
                .map(|id| Job::from_path(dir.join(format!("{}.mol2", id))))
                .collect(),
        }
    }

    fn runner(script: &str, home: &Path) -> IsolatedRunner {
        IsolatedRunner::new(sh(script), SearchType::Substructure, home.to_path_buf())
    }

    #[test]
    fn test_timeout_fails_whole_chunk() {
        let dir = tempdir().unwrap();
        let ctx = RunContext::new(dir.path().join("results"));
        let runner = runner("sleep 5", dir.path()).with_timeout(Duration::from_secs(1));
        let chunk = chunk(dir.path(), &["A", "B", "C"]);

        let start = Instant::now();
        let result = runner.run_chunk(&chunk, &ctx);
        assert!(start.elapsed() < Duration::from_secs(4));
        assert!(result.success_list.is_empty());
        assert!(result.result_list.is_empty());
        assert_eq!(result.fail_list, chunk.jobs);
    }

    #[test]
    fn test_request_file_and_log() {
        let dir = tempdir().unwrap();
        let results = dir.path().join("results");
        let ctx = RunContext::new(&results);
        // $1 is the request file, $9 the hit list path
        let runner = runner(
            "echo searching; head -n 1 \"$1\" > \"$9\"; sed -n 2p \"$1\" > \"$(dirname \"$9\")/hitList.nomatch.list\"",
            dir.path(),
        );
        let chunk = chunk(dir.path(), &["A", "B"]);

        let result = runner.run_chunk(&chunk, &ctx);
        assert_eq!(result.success_list, vec![chunk.jobs[0].clone()]);
        assert_eq!(result.result_list, vec![chunk.jobs[0].path_string()]);
        assert_eq!(result.no_match_list, vec![chunk.jobs[1].clone()]);
        assert!(result.fail_list.is_empty());

        let work_dir = results.join("chunk-0003");
        let request = storage::import_list(&work_dir.join(QUERY_LIST_FILE_NAME)).unwrap();
        assert_eq!(request.len(), 2);
        let log = fs::read_to_string(work_dir.join(EXEC_LOG_FILE_NAME)).unwrap();
        assert_eq!(log.trim(), "searching");
    }

    #[test]
    fn test_nonzero_exit_fails_chunk() {
        let dir = tempdir().unwrap();
        let ctx = RunContext::new(dir.path().join("results"));
        let runner = runner("head -n 1 \"$1\" > \"$9\"; exit 3", dir.path());
        let chunk = chunk(dir.path(), &["A", "B"]);

        let result = runner.run_chunk(&chunk, &ctx);
        assert!(result.success_list.is_empty());
        assert_eq!(result.fail_list.len(), 2);
    }

    #[test]
    fn test_missing_hit_list_fails_chunk() {
        let dir = tempdir().unwrap();
        let ctx = RunContext::new(dir.path().join("results"));
        let result = runner("exit 0", dir.path()).run_chunk(&chunk(dir.path(), &["A"]), &ctx);
        assert_eq!(result.fail_list.len(), 1);
    }

    #[test]
    fn test_launch_failure_fails_chunk() {
        let dir = tempdir().unwrap();
        let ctx = RunContext::new(dir.path().join("results"));
        let runner = IsolatedRunner::new(
            IsolatedCommand::new(dir.path().join("no-such-program")),
            SearchType::Similarity,
            dir.path().to_path_buf(),
        );
        let result = runner.run_chunk(&chunk(dir.path(), &["A", "B"]), &ctx);
        assert_eq!(result.fail_list.len(), 2);
        assert_eq!(ctx.metrics().get_stats().jobs_failed, 2);
    }

    #[test]
    fn test_killed_child_is_reaped() {
        let mut child = Command::new("/bin/sh")
            .arg("-c")
            .arg("sleep 5")
            .spawn()
            .unwrap();
        kill_and_reap(&mut child);
        assert!(child.try_wait().unwrap().is_some());

        let mut child = Command::new("/bin/sh")
            .arg("-c")
            .arg("sleep 5")
            .spawn()
            .unwrap();
        let status = wait_with_timeout(&mut child, Duration::from_millis(100)).unwrap();
        assert!(status.is_none());
        assert!(child.try_wait().unwrap().is_some());
    }

    #[test]
    fn test_stop_before_launch() {
        let dir = tempdir().unwrap();
        let results = dir.path().join("results");
        crate::stop::request_stop(&results).unwrap();
        let ctx = RunContext::new(&results);

        let result = runner("exit 1", dir.path()).run_chunk(&chunk(dir.path(), &["A"]), &ctx);
        assert!(result.stopped);
        assert_eq!(result.processed(), 0);
        assert!(!results.join("chunk-0003").exists());
    }
}
