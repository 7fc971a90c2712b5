use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::num::NonZeroUsize;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::ChunkRunner;
use crate::errors::{SearchError, SearchResult};
use crate::job::{partition, Chunk, Job};
use crate::results::{RunReport, WorkerResult};
use crate::storage;
use crate::stop::RunContext;

const DEFAULT_CHUNK_SIZE: usize = 10;

/// Sizing of a pool run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolOptions {
    /// Upper bound on chunks executing at the same time
    pub num_workers: NonZeroUsize,
    pub chunk_size: NonZeroUsize,
    pub show_progress: bool,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            num_workers: NonZeroUsize::new(num_cpus::get()).unwrap_or(NonZeroUsize::MIN),
            chunk_size: NonZeroUsize::new(DEFAULT_CHUNK_SIZE).unwrap_or(NonZeroUsize::MIN),
            show_progress: false,
        }
    }
}

/// Partitions a job list and runs the chunks on at most `num_workers`
/// concurrent workers
pub struct WorkerPool<R> {
    runner: R,
    options: PoolOptions,
}

impl<R: ChunkRunner> WorkerPool<R> {
    /// Builds a pool, lowering `num_workers` to what the runner supports.
    pub fn new(runner: R, mut options: PoolOptions) -> Self {
        if let Some(limit) = runner.max_concurrent_chunks() {
            if options.num_workers > limit {
                warn!(
                    "{} workers requested but the runner executes at most {} chunk(s) at a time, using {}",
                    options.num_workers, limit, limit
                );
                options.num_workers = limit;
            }
        }
        Self { runner, options }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn options(&self) -> &PoolOptions {
        &self.options
    }

    /// Runs every job and blocks until all chunks are done.
    ///
    /// Only problems found before any worker starts are returned as errors:
    /// an empty job list or a result directory that cannot be written. Chunk
    /// and job failures end up in the report.
    pub fn run_search(&self, jobs: &[Job], ctx: &RunContext) -> SearchResult<RunReport> {
        if jobs.is_empty() {
            return Err(SearchError::invalid_job_list("no jobs to run"));
        }
        check_result_dir(ctx)?;

        let start = Instant::now();
        let chunks = partition(jobs, self.options.chunk_size);
        let num_workers = self.options.num_workers.get();
        info!(
            "Running {} jobs in {} chunks of up to {} on {} workers",
            jobs.len(),
            chunks.len(),
            self.options.chunk_size,
            num_workers
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_workers)
            .thread_name(|i| format!("ccsearch-worker-{}", i))
            .build()
            .map_err(|e| SearchError::config_error(format!("cannot start worker pool: {}", e)))?;

        let progress = self.progress_bar(chunks.len());
        let results: Vec<WorkerResult> = pool.install(|| {
            chunks
                .par_iter()
                .with_max_len(1)
                .map(|chunk| {
                    let result = self.run_one(chunk, ctx);
                    progress.inc(1);
                    result
                })
                .collect()
        });
        progress.finish_and_clear();

        let mut combined = WorkerResult::new();
        for result in results {
            combined.merge(result);
        }

        let report = RunReport {
            total_jobs: jobs.len(),
            total_chunks: chunks.len(),
            combined,
            stats: ctx.metrics().get_stats(),
            elapsed: start.elapsed(),
        };
        info!(
            "Search run finished in {}: success count {}, no-match count {}, failure count {}",
            humantime::format_duration(report.elapsed),
            report.success_count(),
            report.no_match_count(),
            report.failure_count()
        );
        if report.stopped() {
            info!(
                "Run was stopped, {} jobs not processed",
                report.unprocessed_count()
            );
        }
        ctx.metrics().log_stats();
        Ok(report)
    }

    fn run_one(&self, chunk: &Chunk, ctx: &RunContext) -> WorkerResult {
        let start = Instant::now();
        let result = self.runner.run_chunk(chunk, ctx);
        let whole_chunk_failed = !chunk.is_empty() && result.fail_list.len() == chunk.len();
        ctx.metrics()
            .record_chunk(start.elapsed(), whole_chunk_failed, result.stopped);
        debug!(
            "{} returned {} of {} outcomes",
            chunk.name(),
            result.processed(),
            chunk.len()
        );
        result
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        if !self.options.show_progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(len as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} chunks")
        {
            bar.set_style(style.progress_chars("=>-"));
        }
        bar
    }
}

fn check_result_dir(ctx: &RunContext) -> SearchResult<()> {
    let dir = ctx.result_dir();
    storage::mkdir(dir)?;
    tempfile::tempfile_in(dir)
        .map(drop)
        .map_err(|e| SearchError::from_io(e, dir))
}
